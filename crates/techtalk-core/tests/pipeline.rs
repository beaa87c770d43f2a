use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::{stream, StreamExt};
use techtalk_core::aggregator::ERROR_MESSAGE;
use techtalk_core::{
    ChatId, ChatSession, CodeBlock, CompletionClient, CompletionRequest, FragmentStream, Message,
    Rejected, Role, SessionOptions, StreamError, Update,
};

enum Script {
    Reply(Vec<Result<&'static str, StreamError>>),
    Hang,
}

/// Plays back canned replies in order and records every request
struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    fn with(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::default(),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

impl CompletionClient for ScriptedClient {
    fn stream_completion(&self, request: CompletionRequest) -> FragmentStream {
        self.requests.lock().unwrap().push(request);
        match self.scripts.lock().unwrap().pop_front() {
            Some(Script::Reply(items)) => {
                let items: Vec<_> = items.into_iter().map(|r| r.map(str::to_string)).collect();
                stream::iter(items).boxed()
            }
            Some(Script::Hang) | None => stream::pending().boxed(),
        }
    }
}

fn setup(client: Arc<ScriptedClient>) -> (ChatSession, ChatId) {
    let mut session = ChatSession::new(client, SessionOptions::new("test-model"));
    let group = session.create_group("");
    let chat = session.create_chat(group, "").unwrap();
    (session, chat)
}

async fn drain(session: &mut ChatSession) -> Vec<Update> {
    let mut updates = Vec::new();
    while let Some(update) = session.next_update().await {
        updates.push(update);
    }
    updates
}

#[tokio::test]
async fn test_hello_end_to_end() {
    let client = ScriptedClient::with(vec![Script::Reply(vec![Ok("He"), Ok("llo"), Ok("!")])]);
    let (mut session, chat) = setup(client.clone());

    session.send_turn(chat, "hi").unwrap();
    assert_eq!(
        session.get_messages(chat).to_vec(),
        vec![Message::user("hi"), Message::assistant("")]
    );

    let updates = drain(&mut session).await;
    assert_eq!(
        updates,
        vec![
            Update::Fragment { chat, text: "He".to_string() },
            Update::Fragment { chat, text: "llo".to_string() },
            Update::Fragment { chat, text: "!".to_string() },
            Update::Completed { chat },
        ]
    );
    assert_eq!(
        session.get_messages(chat).to_vec(),
        vec![Message::user("hi"), Message::assistant("Hello!")]
    );
    assert_eq!(session.get_detected_code_block(chat), None);
    assert!(!session.is_streaming(chat));

    // The request carries the system prompt, then the user message
    let request = client.last_request();
    assert_eq!(request.model, "test-model");
    assert_eq!(request.messages[0].role, Role::System);
    assert_eq!(request.messages[1..], [Message::user("hi")]);
}

#[tokio::test]
async fn test_error_is_terminal() {
    let client = ScriptedClient::with(vec![Script::Reply(vec![
        Ok("partial"),
        Err(StreamError::Status {
            status: 500,
            body: "boom".to_string(),
        }),
        Ok("never"),
    ])]);
    let (mut session, chat) = setup(client);

    session.send_turn(chat, "hi").unwrap();
    let updates = drain(&mut session).await;

    assert_eq!(updates.len(), 2);
    assert!(matches!(
        &updates[1],
        Update::Failed { error: StreamError::Status { status: 500, .. }, .. }
    ));
    assert_eq!(
        session.get_messages(chat).to_vec(),
        vec![Message::user("hi"), Message::assistant(ERROR_MESSAGE)]
    );
}

#[tokio::test]
async fn test_one_turn_in_flight_per_chat() {
    let client = ScriptedClient::with(vec![Script::Hang, Script::Reply(vec![Ok("ok")])]);
    let (mut session, chat) = setup(client.clone());

    session.send_turn(chat, "first").unwrap();
    assert_eq!(session.send_turn(chat, "second"), Err(Rejected::Busy));
    assert_eq!(session.get_messages(chat).len(), 2);

    assert!(session.cancel(chat));
    session.send_turn(chat, "second").unwrap();
    drain(&mut session).await;

    assert_eq!(client.calls(), 2);
    assert_eq!(
        session.get_messages(chat).to_vec(),
        vec![
            Message::user("first"),
            Message::user("second"),
            Message::assistant("ok"),
        ]
    );
}

#[tokio::test]
async fn test_cancel_before_any_text_leaves_no_empty_reply() {
    let client = ScriptedClient::with(vec![Script::Hang, Script::Reply(vec![Ok("ok")])]);
    let (mut session, chat) = setup(client.clone());

    session.send_turn(chat, "first").unwrap();
    assert!(session.cancel(chat));
    assert_eq!(session.get_messages(chat).to_vec(), vec![Message::user("first")]);

    session.send_turn(chat, "second").unwrap();
    drain(&mut session).await;

    let request = client.last_request();
    assert_eq!(
        request.messages[1..],
        [Message::user("first"), Message::user("second")]
    );
    assert!(request
        .messages
        .iter()
        .all(|m| m.role != Role::Assistant || !m.content.is_empty()));
}

#[tokio::test]
async fn test_empty_reply_commits_empty_message() {
    let client = ScriptedClient::with(vec![Script::Reply(vec![])]);
    let (mut session, chat) = setup(client);

    session.send_turn(chat, "say nothing").unwrap();
    let updates = drain(&mut session).await;

    assert_eq!(updates, vec![Update::Completed { chat }]);
    assert_eq!(
        session.get_messages(chat).to_vec(),
        vec![Message::user("say nothing"), Message::assistant("")]
    );
    assert_eq!(session.get_detected_code_block(chat), None);
    assert!(!session.is_streaming(chat));
}

#[tokio::test]
async fn test_chats_stream_independently() {
    let client = ScriptedClient::with(vec![
        Script::Reply(vec![Ok("one")]),
        Script::Reply(vec![Ok("two")]),
    ]);
    let (mut session, a) = setup(client);
    let group = session.groups()[0].id;
    let b = session.create_chat(group, "").unwrap();

    session.send_turn(a, "x").unwrap();
    session.send_turn(b, "y").unwrap();
    drain(&mut session).await;

    assert_eq!(session.get_messages(a)[1], Message::assistant("one"));
    assert_eq!(session.get_messages(b)[1], Message::assistant("two"));
}

#[tokio::test]
async fn test_rejections_make_no_request() {
    let client = ScriptedClient::with(vec![]);
    let (mut session, chat) = setup(client.clone());

    assert_eq!(session.send_turn(chat, "   \n"), Err(Rejected::EmptyInput));
    assert_eq!(
        session.send_turn(uuid::Uuid::new_v4(), "hi"),
        Err(Rejected::UnknownConversation)
    );
    assert_eq!(client.calls(), 0);
    assert!(session.get_messages(chat).is_empty());
}

#[tokio::test]
async fn test_cache_hit_skips_the_provider() {
    let client = ScriptedClient::with(vec![Script::Reply(vec![Ok("Paris")])]);
    let (mut session, chat) = setup(client.clone());

    session.send_turn(chat, "capital of France?").unwrap();
    drain(&mut session).await;
    session.send_turn(chat, "capital of France?").unwrap();
    let updates = drain(&mut session).await;

    assert_eq!(client.calls(), 1);
    assert_eq!(
        updates,
        vec![
            Update::Fragment { chat, text: "Paris".to_string() },
            Update::Completed { chat },
        ]
    );
    assert_eq!(session.get_messages(chat).len(), 4);
    assert_eq!(session.get_messages(chat)[3], Message::assistant("Paris"));
}

#[tokio::test]
async fn test_requested_count_adds_instruction() {
    let client = ScriptedClient::with(vec![Script::Reply(vec![Ok("1. a")])]);
    let (mut session, chat) = setup(client.clone());

    session.send_turn(chat, "Generate 5 sample users").unwrap();
    drain(&mut session).await;

    let request = client.last_request();
    let last = request.messages.last().unwrap();
    assert_eq!(last.role, Role::System);
    assert!(last.content.contains("exactly 5"));
    // The instruction goes to the provider only, not into the transcript
    assert!(session
        .get_messages(chat)
        .iter()
        .all(|m| m.role != Role::System));
}

#[tokio::test]
async fn test_code_block_split_across_fragments() {
    let client = ScriptedClient::with(vec![Script::Reply(vec![
        Ok("Try:\n``"),
        Ok("`\nfunction foo(){}\n"),
        Ok("``"),
        Ok("`\nDone."),
    ])]);
    let (mut session, chat) = setup(client);

    session.send_turn(chat, "js please").unwrap();
    let mut blocks = Vec::new();
    while let Some(update) = session.next_update().await {
        if matches!(update, Update::Fragment { .. }) {
            blocks.push(session.get_detected_code_block(chat));
        }
    }

    assert!(blocks[..3].iter().all(Option::is_none));
    let expected = CodeBlock {
        language: "javascript".to_string(),
        body: "function foo(){}".to_string(),
    };
    assert_eq!(blocks[3].as_ref(), Some(&expected));
    assert_eq!(session.get_detected_code_block(chat), Some(expected));
}

#[tokio::test]
async fn test_history_is_sent_on_follow_up() {
    let client = ScriptedClient::with(vec![
        Script::Reply(vec![Ok("Hello!")]),
        Script::Reply(vec![Ok("Fine.")]),
    ]);
    let (mut session, chat) = setup(client.clone());

    session.send_turn(chat, "hi").unwrap();
    drain(&mut session).await;
    let before = session.revision(chat);
    session.send_turn(chat, "how are you?").unwrap();
    drain(&mut session).await;

    assert!(session.revision(chat) > before);
    let request = client.last_request();
    assert_eq!(
        request.messages[1..],
        [
            Message::user("hi"),
            Message::assistant("Hello!"),
            Message::user("how are you?"),
        ]
    );
}
