//! # Client Tests
//!
//! Drive [`SsipClient`] against a scripted daemon on a loopback port and
//! check both what goes over the wire and what the caller gets back.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use ssip_client::{
    CapitalLetters, ClientError, ClientIdentity, ConnectionConfig, DataMode, Event, EventType,
    Priority, PunctuationMode, Scope, SsipClient, VoiceInfo, VoiceType,
};
use ssip_protocol::testing::{MockDaemon, Request, Responder};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CLIENT_ID: u32 = 7;
const MESSAGE_ID: u32 = 42;
const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

/// Answers like the real daemon. `after_speak` runs once the reply to each
/// data block has been written, to push events for it.
fn speechd<F>(mut after_speak: F) -> MockDaemon
where
    F: FnMut(&Responder) -> io::Result<()> + Send + 'static,
{
    MockDaemon::start(move |request, responder| {
        let line = match request {
            Request::Data(_) => {
                responder.reply(225, "OK MESSAGE QUEUED", &[&MESSAGE_ID.to_string()])?;
                return after_speak(responder);
            }
            Request::Command(line) => line.as_str(),
        };

        let words: Vec<&str> = line.split(' ').collect();
        match words.as_slice() {
            ["SET", "self", "CLIENT_NAME", _] => responder.reply(208, "OK CLIENT NAME SET", &[]),
            ["HISTORY", "GET", "CLIENT_ID"] => {
                responder.reply(240, "OK CLIENT ID SENT", &[&CLIENT_ID.to_string()])
            }
            ["SET", "self", "NOTIFICATION", _, _] => {
                responder.reply(218, "OK NOTIFICATION SET", &[])
            }
            ["SET", _, "OUTPUT_MODULE", "nonexistent"] => {
                responder.reply(409, "ERR UNKNOWN OUTPUT MODULE", &[])
            }
            ["SET", ..] => responder.reply(203, "OK SET", &[]),
            ["SPEAK"] => responder.reply(230, "OK RECEIVING DATA", &[]),
            ["CHAR", _] | ["KEY", _] | ["SOUND_ICON", _] => {
                responder.reply(225, "OK MESSAGE QUEUED", &[&MESSAGE_ID.to_string()])
            }
            ["GET", "OUTPUT_MODULE"] => responder.reply(251, "OK GET RETURNED", &["espeak-ng"]),
            ["LIST", "OUTPUT_MODULES"] => {
                responder.reply(250, "OK MODULE LIST SENT", &["espeak-ng", "festival", "dummy"])
            }
            ["LIST", "VOICES"] => {
                responder.reply(249, "OK VOICE LIST SENT", &["MALE1", "FEMALE1", "CHILD_MALE"])
            }
            ["LIST", "SYNTHESIS_VOICES"] => responder.reply(
                249,
                "OK VOICE LIST SENT",
                &["english\ten\tnone", "german\tde\tnone", "klatt\ten-US\tklatt2"],
            ),
            ["QUIT"] => responder.reply(231, "HAPPY HACKING", &[]),
            ["STOP", "999"] => Ok(()),
            _ => responder.reply(200, "OK", &[]),
        }
    })
    .unwrap()
}

fn connect(daemon: &MockDaemon) -> SsipClient {
    let config = ConnectionConfig {
        host: daemon.host(),
        port: daemon.port(),
    };
    let identity = ClientIdentity::new("tests").with_user("joe");
    SsipClient::connect(&config, &identity).unwrap()
}

fn event_channel() -> (impl Fn(&Event) + Send + Sync + 'static, Receiver<Event>) {
    let (tx, rx) = unbounded();
    (
        move |event: &Event| {
            let _ = tx.send(event.clone());
        },
        rx,
    )
}

/// Number of commands seen after the registration handshake.
const HANDSHAKE_COMMANDS: usize = 8;

#[test_log::test]
fn test_connect_registers_client() {
    let daemon = speechd(|_| Ok(()));
    let client = connect(&daemon);

    assert_eq!(client.client_id(), Some(CLIENT_ID));
    assert_eq!(client.identity().full_name(), "joe:tests:main");
    assert!(client.is_connected());
    assert_eq!(
        daemon.commands(),
        vec![
            "SET self CLIENT_NAME joe:tests:main",
            "HISTORY GET CLIENT_ID",
            "SET self NOTIFICATION index_marks on",
            "SET self NOTIFICATION begin on",
            "SET self NOTIFICATION end on",
            "SET self NOTIFICATION cancel on",
            "SET self NOTIFICATION pause on",
            "SET self NOTIFICATION resume on",
        ]
    );
    assert_eq!(daemon.commands().len(), HANDSHAKE_COMMANDS);
}

#[test_log::test]
fn test_connect_fails_without_client_id() {
    let daemon = MockDaemon::start(|request, responder| match request {
        Request::Command(line) if line == "HISTORY GET CLIENT_ID" => {
            responder.reply(240, "OK CLIENT ID SENT", &[])
        }
        _ => responder.reply(200, "OK", &[]),
    })
    .unwrap();
    let config = ConnectionConfig {
        host: daemon.host(),
        port: daemon.port(),
    };

    let result = SsipClient::connect(&config, &ClientIdentity::new("tests"));
    assert!(
        matches!(result, Err(ClientError::UnexpectedReply { .. })),
        "{:?}",
        result
    );
}

#[test_log::test]
fn test_speak_returns_message_id() {
    let daemon = speechd(|_| Ok(()));
    let client = connect(&daemon);

    assert_eq!(client.speak("hello").unwrap(), Some(MESSAGE_ID));

    let requests = daemon.requests();
    assert_eq!(requests[HANDSHAKE_COMMANDS], Request::Command("SPEAK".into()));
    assert_eq!(requests[HANDSHAKE_COMMANDS + 1], Request::Data("hello".into()));
}

#[test_log::test]
fn test_speak_multiline_text_is_escaped() {
    let daemon = speechd(|_| Ok(()));
    let client = connect(&daemon);

    client.speak(".\r\nfirst\r\n.\r\nlast").unwrap();
    assert_eq!(
        daemon.requests()[HANDSHAKE_COMMANDS + 1],
        Request::Data("..\r\nfirst\r\n..\r\nlast".into())
    );
}

#[test_log::test]
fn test_tracked_speak_retires_after_end() {
    let daemon = speechd(|responder| {
        responder.event(701, MESSAGE_ID, CLIENT_ID, None)?;
        responder.event(700, MESSAGE_ID, CLIENT_ID, Some("chapter1"))?;
        responder.event(702, MESSAGE_ID, CLIENT_ID, None)?;
        responder.event(702, MESSAGE_ID, CLIENT_ID, None)
    });
    let client = connect(&daemon);

    let (callback, events) = event_channel();
    let message_id = client.speak_tracked("hello", &[], callback).unwrap();
    assert_eq!(message_id, Some(MESSAGE_ID));

    let begin = events.recv_timeout(WAIT).unwrap();
    assert_eq!(begin.event_type, EventType::Begin);
    assert_eq!(begin.message_id, MESSAGE_ID);

    let mark = events.recv_timeout(WAIT).unwrap();
    assert_eq!(mark.event_type, EventType::IndexMark);
    assert_eq!(mark.index_mark.as_deref(), Some("chapter1"));

    assert_eq!(events.recv_timeout(WAIT).unwrap().event_type, EventType::End);
    assert_eq!(events.recv_timeout(QUIET), Err(RecvTimeoutError::Timeout));
}

#[test_log::test]
fn test_tracked_speak_filters_event_types() {
    let daemon = speechd(|responder| {
        responder.event(701, MESSAGE_ID, CLIENT_ID, None)?;
        responder.event(704, MESSAGE_ID, CLIENT_ID, None)?;
        responder.event(705, MESSAGE_ID, CLIENT_ID, None)?;
        responder.event(703, MESSAGE_ID, CLIENT_ID, None)
    });
    let client = connect(&daemon);

    let (callback, events) = event_channel();
    client
        .speak_tracked("hello", &[EventType::End, EventType::Cancel], callback)
        .unwrap();

    assert_eq!(events.recv_timeout(WAIT).unwrap().event_type, EventType::Cancel);
    assert_eq!(events.recv_timeout(QUIET), Err(RecvTimeoutError::Timeout));
}

#[test_log::test]
fn test_event_callback_sees_only_own_client() {
    let daemon = speechd(|responder| {
        responder.event(701, 99, CLIENT_ID + 1, None)?;
        responder.event(701, MESSAGE_ID, CLIENT_ID, None)
    });
    let client = connect(&daemon);

    let (callback, events) = event_channel();
    client.set_event_callback(callback);
    client.speak("hello").unwrap();

    let event = events.recv_timeout(WAIT).unwrap();
    assert_eq!(event.message_id, MESSAGE_ID);
    assert_eq!(event.client_id, CLIENT_ID);
    assert_eq!(events.recv_timeout(QUIET), Err(RecvTimeoutError::Timeout));

    client.clear_event_callback();
}

#[test_log::test]
fn test_invalid_arguments_never_reach_the_wire() {
    let daemon = speechd(|_| Ok(()));
    let client = connect(&daemon);

    let failures = vec![
        client.set_rate(101, Scope::Current),
        client.set_pitch(-101, Scope::Current),
        client.set_volume(1000, Scope::All),
        client.set_pitch_range(-200, Scope::Current),
        client.set_language("en\r\nQUIT", Scope::Current),
        client.set_output_module("", Scope::Current),
        client.set_synthesis_voice("voice\n", Scope::Current),
        client.speak("").map(drop),
        client.speak_char('\n').map(drop),
        client.key("").map(drop),
        client.sound_icon(" ").map(drop),
    ];
    for result in failures {
        assert!(
            matches!(result, Err(ClientError::InvalidArgument(_))),
            "{:?}",
            result
        );
    }

    assert_eq!(daemon.commands().len(), HANDSHAKE_COMMANDS);
    assert!(client.is_connected());
}

#[test_log::test]
fn test_commands_on_the_wire() {
    let daemon = speechd(|_| Ok(()));
    let client = connect(&daemon);

    client.set_priority(Priority::Important).unwrap();
    client.set_data_mode(DataMode::Ssml).unwrap();
    client.set_rate(-30, Scope::Client(12)).unwrap();
    client.set_pitch(100, Scope::Current).unwrap();
    client.set_punctuation(PunctuationMode::Some, Scope::All).unwrap();
    client.set_spelling(false, Scope::Current).unwrap();
    client.set_cap_let_recogn(CapitalLetters::Icon, Scope::Current).unwrap();
    client.set_voice(VoiceType::ChildMale, Scope::Current).unwrap();
    client.set_pause_context(3, Scope::Current).unwrap();
    client.set_notification(EventType::IndexMark, false).unwrap();
    client.cancel(Scope::All).unwrap();
    client.pause(Scope::Client(3)).unwrap();
    client.resume(Scope::Current).unwrap();
    client.stop(Scope::Current).unwrap();
    client.block_begin().unwrap();
    client.block_end().unwrap();

    assert_eq!(
        daemon.commands()[HANDSHAKE_COMMANDS..].to_vec(),
        vec![
            "SET self PRIORITY important",
            "SET self SSML_MODE on",
            "SET 12 RATE -30",
            "SET self PITCH 100",
            "SET all PUNCTUATION some",
            "SET self SPELLING off",
            "SET self CAP_LET_RECOGN icon",
            "SET self VOICE_TYPE CHILD_MALE",
            "SET self PAUSE_CONTEXT 3",
            "SET self NOTIFICATION index_marks off",
            "CANCEL all",
            "PAUSE 3",
            "RESUME self",
            "STOP self",
            "BLOCK BEGIN",
            "BLOCK END",
        ]
    );
}

#[test_log::test]
fn test_char_key_and_sound_icon() {
    let daemon = speechd(|_| Ok(()));
    let client = connect(&daemon);

    assert_eq!(client.speak_char(' ').unwrap(), Some(MESSAGE_ID));
    assert_eq!(client.speak_char('ä').unwrap(), Some(MESSAGE_ID));
    assert_eq!(client.key("shift_F5").unwrap(), Some(MESSAGE_ID));
    assert_eq!(client.sound_icon("bell").unwrap(), Some(MESSAGE_ID));

    assert_eq!(
        daemon.commands()[HANDSHAKE_COMMANDS..].to_vec(),
        vec!["CHAR space", "CHAR ä", "KEY shift_F5", "SOUND_ICON bell"]
    );
}

#[test_log::test]
fn test_queries() {
    let daemon = speechd(|_| Ok(()));
    let client = connect(&daemon);

    assert_eq!(client.get_output_module().unwrap(), "espeak-ng");
    assert_eq!(
        client.list_output_modules().unwrap(),
        vec!["espeak-ng", "festival", "dummy"]
    );
    assert_eq!(
        client.list_voices().unwrap(),
        vec!["MALE1", "FEMALE1", "CHILD_MALE"]
    );

    let voices = client.list_synthesis_voices().unwrap();
    assert_eq!(voices.len(), 3);
    assert_eq!(
        voices[2],
        VoiceInfo {
            name: "klatt".into(),
            language: "en-US".into(),
            variant: "klatt2".into(),
        }
    );
}

#[test_log::test]
fn test_daemon_rejection_is_distinct_from_invalid_argument() {
    let daemon = speechd(|_| Ok(()));
    let client = connect(&daemon);

    let err = client
        .set_output_module("nonexistent", Scope::Current)
        .unwrap_err();
    assert!(err.is_rejected(), "{:?}", err);
    assert!(!err.is_connection_lost());
    match err {
        ClientError::Ssip(inner) => assert_eq!(inner.code(), Some(409)),
        other => panic!("expected daemon error, got {:?}", other),
    }

    // Still usable.
    client.set_output_module("festival", Scope::Current).unwrap();
}

#[test_log::test]
fn test_close_says_goodbye_once() {
    let daemon = speechd(|_| Ok(()));
    let client = connect(&daemon);

    client.close();
    client.close();
    assert!(!client.is_connected());

    let err = client.speak("too late").unwrap_err();
    assert!(err.is_connection_lost(), "{:?}", err);

    let quits = daemon
        .commands()
        .iter()
        .filter(|command| command.as_str() == "QUIT")
        .count();
    assert_eq!(quits, 1);
}

#[test_log::test]
fn test_lost_connection_is_reported() {
    let daemon = speechd(|_| Ok(()));
    let client = connect(&daemon);

    daemon.responder().unwrap().sever();

    let err = client.speak("hello").unwrap_err();
    assert!(err.is_connection_lost(), "{:?}", err);
    assert!(!err.is_rejected());
}

#[test_log::test]
fn test_close_releases_caller_waiting_for_reply() {
    let daemon = speechd(|_| Ok(()));
    let client = Arc::new(connect(&daemon));

    // The daemon never answers this one.
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let waiting = Arc::clone(&client);
    thread::spawn(move || {
        let result = waiting.stop(Scope::Client(999));
        let _ = done_tx.send(result);
    });
    thread::sleep(QUIET);

    let (closed_tx, closed_rx) = crossbeam_channel::bounded(1);
    let closing = Arc::clone(&client);
    thread::spawn(move || {
        closing.close();
        let _ = closed_tx.send(());
    });

    closed_rx.recv_timeout(WAIT).expect("close returned");
    let result = done_rx.recv_timeout(WAIT).expect("waiting caller released");
    assert!(
        matches!(&result, Err(err) if err.is_connection_lost()),
        "{:?}",
        result
    );
    assert!(!client.is_connected());
    assert!(!daemon.commands().iter().any(|command| command == "QUIT"));
}
