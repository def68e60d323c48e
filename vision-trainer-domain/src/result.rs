use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
};

/// Error of Vision Trainer. All failures end up here as a human readable message, there is no
/// error hierarchy to match on.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct VtError {
    msg: String,
}
impl VtError {
    pub fn new(msg: &str) -> VtError {
        VtError {
            msg: msg.to_string(),
        }
    }
    pub fn msg(&self) -> &str {
        &self.msg
    }
}
impl Display for VtError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}
impl Error for VtError {}
impl From<&str> for VtError {
    fn from(value: &str) -> Self {
        VtError::new(value)
    }
}
/// Vision Trainer's result type with [`VtError`](VtError) as error type.
pub type VtResult<U> = Result<U, VtError>;

/// Creates a [`VtError`](VtError) with a formatted message.
/// ```rust
/// # use std::error::Error;
/// use vision_trainer_domain::{vterr, VtError};
/// # fn main() -> Result<(), Box<dyn Error>> {
/// assert_eq!(vterr!("some error {}", 1), VtError::new(format!("some error {}", 1).as_str()));
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! vterr {
    ($s:literal) => {
        $crate::result::VtError::new(format!($s).as_str())
    };
    ($s:literal, $( $exps:expr ),*) => {
        $crate::result::VtError::new(format!($s, $($exps,)*).as_str())
    }
}

pub fn to_vt<E: Debug>(e: E) -> VtError {
    vterr!(
        "original error type is '{:?}', error message is '{:?}'",
        std::any::type_name::<E>(),
        e
    )
}

#[test]
fn test_to_vt() {
    let e = to_vt(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
    assert!(e.msg().contains("gone"));
    assert!(e.msg().contains("io::error::Error"));
    assert_eq!(format!("{}", vterr!("a {} c", "b")), "a b c");
}
