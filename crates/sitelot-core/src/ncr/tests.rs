//! Tests for NCR types.

use super::{NcrError, NcrStatus, Severity};

#[test]
fn open_statuses() {
    assert!(NcrStatus::Open.is_open());
    assert!(NcrStatus::Investigating.is_open());
    assert!(NcrStatus::ActionRequired.is_open());
    assert!(!NcrStatus::Closed.is_open());
    assert!(!NcrStatus::ClosedConcession.is_open());
}

#[test]
fn status_display_parse_round_trip() {
    for status in [
        NcrStatus::Open,
        NcrStatus::Investigating,
        NcrStatus::ActionRequired,
        NcrStatus::Closed,
        NcrStatus::ClosedConcession,
    ] {
        let parsed: NcrStatus = status.to_string().parse().unwrap();
        assert_eq!(parsed, status);
    }
}

#[test]
fn invalid_status_errors() {
    let err = "bogus".parse::<NcrStatus>().unwrap_err();
    assert_eq!(
        err,
        NcrError::InvalidStatus {
            value: "bogus".to_string()
        }
    );
}

#[test]
fn severity_parse() {
    assert_eq!("minor".parse::<Severity>().unwrap(), Severity::Minor);
    assert_eq!("major".parse::<Severity>().unwrap(), Severity::Major);
    assert!("critical".parse::<Severity>().is_err());
}
