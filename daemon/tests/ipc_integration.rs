/// Integration tests for IPC communication
/// These tests verify that commands and responses serialize correctly
/// and can be sent over IPC boundaries
use common::{
    Candidate, Command, FeedError, FeedStatus, ItemId, ItemPhase, ItemStatus, LifecycleEvent, PlaybackEvent, Rect,
    Response, SourceLocator,
};

#[test]
fn test_visibility_command_roundtrip() {
    let cmd = Command::Visibility {
        viewport: Rect::new(0.0, 1200.0, 390.0, 844.0),
        candidates: vec![
            Candidate {
                id: ItemId(11),
                source: SourceLocator::from("bundle:beach"),
                frame: Rect::new(0.0, 1180.0, 390.0, 400.0),
            },
            Candidate {
                id: ItemId(12),
                source: SourceLocator::from("https://cdn.example/clip.mp4"),
                frame: Rect::new(0.0, 1700.0, 390.0, 400.0),
            },
        ],
    };

    let json = serde_json::to_string(&cmd).unwrap();
    let deserialized: Command = serde_json::from_str(&json).unwrap();

    match deserialized {
        Command::Visibility {
            viewport,
            candidates,
        } => {
            assert_eq!(viewport.y, 1200.0);
            assert_eq!(viewport.height, 844.0);
            assert_eq!(candidates.len(), 2);
            assert_eq!(candidates[0].id, ItemId(11));
            assert_eq!(candidates[1].source.as_str(), "https://cdn.example/clip.mp4");
            assert_eq!(candidates[1].frame.max_y(), 2100.0);
        }
        _ => panic!("Wrong command type"),
    }
}

#[test]
fn test_simple_commands() {
    let commands = vec![
        Command::WillRecycle { item: ItemId(3) },
        Command::Lifecycle {
            event: LifecycleEvent::EnteredBackground,
        },
        Command::SetMuted {
            item: ItemId(3),
            muted: false,
        },
        Command::Status,
        Command::Ping,
        Command::Kill,
    ];

    for cmd in commands {
        let json = serde_json::to_string(&cmd).unwrap();
        let deserialized: Command = serde_json::from_str(&json).unwrap();
        // Ensure they serialize/deserialize without errors
        assert!(format!("{:?}", deserialized).len() > 0);
    }
}

#[test]
fn test_item_ids_are_plain_numbers_on_the_wire() {
    let json = serde_json::to_string(&Command::WillRecycle { item: ItemId(42) }).unwrap();
    assert_eq!(json, r#"{"WillRecycle":{"item":42}}"#);

    let cmd: Command = serde_json::from_str(r#"{"SetMuted":{"item":9,"muted":true}}"#).unwrap();
    assert!(matches!(
        cmd,
        Command::SetMuted {
            item: ItemId(9),
            muted: true
        }
    ));
}

#[test]
fn test_events_response() {
    let response = Response::Events(vec![
        PlaybackEvent::Stopped(ItemId(1)),
        PlaybackEvent::Started(ItemId(3)),
        PlaybackEvent::LoadFailed {
            item: ItemId(4),
            error: "cannot resolve source bundle:missing".to_string(),
        },
    ]);

    let json = serde_json::to_string(&response).unwrap();
    let deserialized: Response = serde_json::from_str(&json).unwrap();

    match deserialized {
        Response::Events(events) => {
            assert_eq!(events.len(), 3);
            assert_eq!(events[0], PlaybackEvent::Stopped(ItemId(1)));
            assert_eq!(events[2].item(), ItemId(4));
        }
        _ => panic!("Wrong response type"),
    }
}

#[test]
fn test_status_response() {
    let status = FeedStatus {
        version: "0.1.0".to_string(),
        uptime_secs: 3600,
        enabled: true,
        playing: vec![ItemId(2)],
        preloaded: vec![SourceLocator::from("bundle:next")],
        resource_count: 2,
        items: vec![ItemStatus {
            id: ItemId(2),
            source: SourceLocator::from("bundle:now"),
            frame: Rect::new(0.0, 120.0, 390.0, 400.0),
            phase: ItemPhase::Playing,
            has_resource: true,
            muted: true,
        }],
    };

    let response = Response::Status(status);
    let json = serde_json::to_string(&response).unwrap();
    let deserialized: Response = serde_json::from_str(&json).unwrap();

    match deserialized {
        Response::Status(s) => {
            assert_eq!(s.version, "0.1.0");
            assert_eq!(s.uptime_secs, 3600);
            assert_eq!(s.playing, vec![ItemId(2)]);
            assert_eq!(s.preloaded[0].as_str(), "bundle:next");
            assert_eq!(s.items[0].phase, ItemPhase::Playing);
        }
        _ => panic!("Wrong response type"),
    }
}

#[test]
fn test_error_response() {
    let errors = vec![
        FeedError::UnknownItem(ItemId(5)),
        FeedError::Ipc("Invalid command".to_string()),
        FeedError::Playback("decoder stalled".to_string()),
        FeedError::Io("broken pipe".to_string()),
    ];

    for error in errors {
        let response = Response::Error(error);
        let json = serde_json::to_string(&response).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();

        match deserialized {
            Response::Error(_) => {}
            _ => panic!("Expected error response"),
        }
    }
}

#[test]
fn test_invalid_json_handling() {
    let invalid_json = r#"{"InvalidCommand": {}}"#;
    let result: Result<Command, _> = serde_json::from_str(invalid_json);
    assert!(result.is_err());

    let malformed = r#"{"Visibility": {"viewport": {"x": 0}}"#;
    let result: Result<Command, _> = serde_json::from_str(malformed);
    assert!(result.is_err());
}
