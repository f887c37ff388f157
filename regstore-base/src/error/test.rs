use crate::Error;

#[test]
fn codec_error_carries_detail() {
    let err = Error::codec("registration", "truncated buffer");
    match err {
        Error::Codec { what, detail } => {
            assert_eq!(what, "registration");
            assert_eq!(detail, "truncated buffer");
        }
        other => panic!("wrong variant: {other:?}"),
    }
}

#[test]
fn lock_acquisition_failed_reports_attempts() {
    let err = Error::lock_acquisition_failed("dev-A", 7);
    assert_eq!(err.to_string(), "failed to acquire lock for endpoint \"dev-A\" after 7 attempts");
}
