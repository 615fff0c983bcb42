//! Classify HTTP status and curl errors into retry policy error kinds.

use super::error::DeliveryError;
use super::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

/// Classify a delivery error. Any non-200 answer is worth another attempt:
/// the receiving side may be restarting.
pub fn classify_delivery(e: &DeliveryError) -> ErrorKind {
    match e {
        DeliveryError::Curl(ce) => classify_curl_error(ce),
        DeliveryError::Http(code) => match classify_http_status(*code) {
            ErrorKind::Other => ErrorKind::Connection,
            kind => kind,
        },
        DeliveryError::Encode(_) | DeliveryError::Join(_) => ErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_and_503_throttled() {
        assert_eq!(classify_http_status(429), ErrorKind::Throttled);
        assert_eq!(classify_http_status(503), ErrorKind::Throttled);
    }

    #[test]
    fn http_5xx_retryable() {
        assert!(matches!(classify_http_status(500), ErrorKind::Http5xx(500)));
        assert!(matches!(classify_http_status(502), ErrorKind::Http5xx(502)));
    }

    #[test]
    fn http_4xx_other() {
        assert_eq!(classify_http_status(404), ErrorKind::Other);
        assert_eq!(classify_http_status(403), ErrorKind::Other);
    }

    #[test]
    fn delivery_retries_any_bad_status() {
        assert_eq!(
            classify_delivery(&DeliveryError::Http(404)),
            ErrorKind::Connection
        );
        assert_eq!(
            classify_delivery(&DeliveryError::Http(429)),
            ErrorKind::Throttled
        );
        assert_eq!(
            classify_delivery(&DeliveryError::Join("panicked".into())),
            ErrorKind::Other
        );
        assert_eq!(
            classify_delivery(&DeliveryError::Encode("bad".into())),
            ErrorKind::Other
        );
    }
}
