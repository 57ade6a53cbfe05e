//! Tests for stage reports and stack combination.

use ndarray::Array2;

use crate::FeatureError;
use crate::family::InstrumentFamily;
use crate::pipeline::{ErrorHandling, StageReport, combine_family};

#[test]
fn test_collect_errors_keeps_going() {
    let mut report = StageReport::new("test");
    let ok: Result<u8, FeatureError> = Ok(1);
    assert_eq!(
        report
            .record(InstrumentFamily::Bass, "stft", ok, ErrorHandling::CollectErrors)
            .unwrap(),
        Some(1)
    );
    let failed: Result<u8, FeatureError> = Err(FeatureError::Configuration("x".into()));
    assert_eq!(
        report
            .record(InstrumentFamily::Brass, "mfcc", failed, ErrorHandling::CollectErrors)
            .unwrap(),
        None
    );
    assert_eq!(report.completed(), 1);
    assert!(!report.is_success());
    assert!(report.to_string().contains("brass/mfcc"));
}

#[test]
fn test_stop_on_first_error_wraps_context() {
    let mut report = StageReport::new("test");
    let failed: Result<(), FeatureError> = Err(FeatureError::Format("bad".into()));
    let err = report
        .record(InstrumentFamily::Reed, "chroma", failed, ErrorHandling::StopOnFirstError)
        .unwrap_err();
    assert!(err.to_string().contains("reed/chroma"));
}

#[test]
fn test_combine_family_checks_sample_counts() {
    let block = Array2::<f32>::ones((3, 2));
    let mut stacks = vec![vec![block.clone(), block.clone()]; 6];
    assert_eq!(combine_family(&stacks, 5).unwrap().len(), 2);

    stacks[3].pop();
    assert!(combine_family(&stacks, 5).is_err());
    assert!(combine_family(&stacks[..4], 5).is_err());
}
