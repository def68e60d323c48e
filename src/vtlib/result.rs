//! Helpers for call sites where an error is reported and then dropped, e.g., in event handlers
//! that must keep the session alive.
use std::fmt::Debug;
use tracing::{error, warn};

pub fn trace_ok_err<T, E>(x: Result<T, E>) -> Option<T>
where
    E: Debug,
{
    match x {
        Ok(x) => Some(x),
        Err(e) => {
            error!("{e:?}");
            None
        }
    }
}

/// Like [`trace_ok_err`] for failures the user can recover from
pub fn trace_ok_warn<T, E>(x: Result<T, E>) -> Option<T>
where
    E: Debug,
{
    match x {
        Ok(x) => Some(x),
        Err(e) => {
            warn!("{e:?}");
            None
        }
    }
}

#[test]
fn test_trace_ok() {
    use vision_trainer_domain::{VtResult, vterr};
    let ok: VtResult<u8> = Ok(3);
    assert_eq!(trace_ok_warn(ok), Some(3));
    let failed: VtResult<u8> = Err(vterr!("label file is broken"));
    assert_eq!(trace_ok_err(failed), None);
}
