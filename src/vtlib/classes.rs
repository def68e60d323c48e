use crate::file_util;
use std::path::Path;
use tracing::info;
use vision_trainer_domain::{VtResult, vterr};

const COLORS: [&str; 6] = ["red", "pink", "blue", "green", "black", "cyan"];

/// Color that boxes of the given class are drawn with
pub fn class_color(class_index: usize) -> &'static str {
    COLORS[class_index % COLORS.len()]
}

/// Names of all classes. The position of a name is the class index that is written to label files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassRegistry {
    names: Vec<String>,
}

impl ClassRegistry {
    pub fn new(names: Vec<String>) -> VtResult<Self> {
        if names.is_empty() {
            Err(vterr!("at least one class is needed"))
        } else {
            Ok(Self { names })
        }
    }
    pub fn from_lines(s: &str) -> VtResult<Self> {
        let names = s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        Self::new(names)
    }
    pub fn from_file(path: &Path) -> VtResult<Self> {
        let content = file_util::read_to_string(path)?;
        let registry = Self::from_lines(&content)
            .map_err(|e| vterr!("could not read classes from {path:?}, {}", e.msg()))?;
        info!("loaded {} classes from {path:?}", registry.len());
        Ok(registry)
    }
    pub fn len(&self) -> usize {
        self.names.len()
    }
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
    pub fn name(&self, class_index: usize) -> Option<&str> {
        self.names.get(class_index).map(String::as_str)
    }
    pub fn check_index(&self, class_index: usize) -> VtResult<usize> {
        if class_index < self.len() {
            Ok(class_index)
        } else {
            Err(vterr!(
                "class index {class_index} is out of range, there are only {} classes",
                self.len()
            ))
        }
    }
    /// Keys 1 to 9 select the first nine classes.
    pub fn index_from_digit(&self, digit: u8) -> VtResult<usize> {
        if !(1..=9).contains(&digit) {
            return Err(vterr!("only digits 1 to 9 select a class, got {digit}"));
        }
        self.check_index(usize::from(digit - 1))
    }
}

#[test]
fn test_registry() {
    let reg = ClassRegistry::from_lines("car\n  truck \n\nbus\n").unwrap();
    assert_eq!(reg.len(), 3);
    assert_eq!(reg.name(1), Some("truck"));
    assert_eq!(reg.name(2), Some("bus"));
    assert_eq!(reg.index_from_digit(1).unwrap(), 0);
    assert_eq!(reg.index_from_digit(3).unwrap(), 2);
    assert!(reg.index_from_digit(4).is_err());
    assert!(reg.index_from_digit(0).is_err());
    assert!(reg.index_from_digit(10).is_err());
    assert!(reg.check_index(3).is_err());
    assert!(ClassRegistry::from_lines("\n \n").is_err());
    assert_eq!(class_color(0), "red");
    assert_eq!(class_color(7), "pink");
}
