use std::error::Error;
use llmium::errors::ChatError;

#[test]
fn test_chat_error_implements_error_trait() {
    // Verify ChatError implements the Error trait
    fn assert_error<T: Error>(_: &T) {}

    let error = ChatError::InvalidInput("test error".to_string());
    assert_error(&error);
}

#[test]
fn test_chat_error_display() {
    let error = ChatError::HttpError("Connection error".to_string());
    assert_eq!(
        format!("{error}"),
        "Failed to send HTTP request: Connection error"
    );

    let error = ChatError::Api {
        message: "Rate limit reached".to_string(),
        kind: Some("rate_limit_exceeded".to_string()),
    };
    assert_eq!(format!("{error}"), "API reported an error: Rate limit reached");

    let error = ChatError::AccessDenied {
        status: 404,
        message: "model_not_found".to_string(),
    };
    assert_eq!(
        format!("{error}"),
        "Access denied to model (status 404): model_not_found"
    );
}

#[test]
fn test_chat_error_from_conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(ChatError::from(json_err), ChatError::JsonError(_)));

    let io_err = std::io::Error::other("disk full");
    assert!(matches!(ChatError::from(io_err), ChatError::StorageError(_)));

    // We can't easily build a reqwest::Error from a response here, but the
    // conversion must exist.
    #[allow(unused)]
    #[allow(clippy::items_after_statements)]
    fn _check_reqwest_conversion(err: reqwest::Error) -> ChatError {
        ChatError::from(err)
    }
}

#[test]
fn test_access_alert_differs_from_network_alert() {
    let denied = ChatError::AccessDenied {
        status: 403,
        message: "forbidden".to_string(),
    };
    let network = ChatError::HttpError("timed out".to_string());

    assert!(denied.is_access_denied());
    assert!(!network.is_access_denied());
    assert!(denied.user_message().contains("access"));
    assert!(network.user_message().contains("Network"));
}

#[test]
fn test_chat_error_keeps_its_kind_through_anyhow() {
    // The CLI wraps library errors in anyhow; the variant must survive so the
    // banner wording stays accurate.
    let wrapped = anyhow::Error::from(ChatError::AccessDenied {
        status: 403,
        message: "forbidden".to_string(),
    });
    let inner = wrapped.downcast_ref::<ChatError>().unwrap();
    assert!(inner.is_access_denied());
    assert!(!inner.user_message().contains("Network error"));
}
