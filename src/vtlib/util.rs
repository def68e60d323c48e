use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;

/// Compares digit runs by their numeric value such that `img2` comes before `img10`.
pub fn natural_cmp(s1: &str, s2: &str) -> Ordering {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"\d+|\D+").expect("static regex is valid");
    }
    let mut tokens1 = RE.find_iter(s1);
    let mut tokens2 = RE.find_iter(s2);
    loop {
        match (tokens1.next(), tokens2.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(t1), Some(t2)) => {
                let (t1, t2) = (t1.as_str(), t2.as_str());
                let ord = match (t1.parse::<u128>(), t2.parse::<u128>()) {
                    (Ok(n1), Ok(n2)) => n1.cmp(&n2).then_with(|| t1.len().cmp(&t2.len())),
                    _ => t1.cmp(t2),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

pub fn version_label() -> String {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_DESC: &str = env!("GIT_DESC");
    #[allow(clippy::const_is_empty)]
    if GIT_DESC.is_empty() {
        format!("Version {VERSION}")
    } else {
        const GIT_DIRTY: &str = env!("GIT_DIRTY");
        let is_dirty = GIT_DIRTY == "true";
        format!(
            "Version {}{}",
            GIT_DESC.trim(),
            if is_dirty { " DIRTY" } else { "" }
        )
    }
}

#[test]
fn test_natural_sort() {
    assert_eq!(natural_cmp("s10", "s2"), Ordering::Greater);
    assert_eq!(natural_cmp("10s", "s2"), Ordering::Less);
    assert_eq!(natural_cmp("10", "2"), Ordering::Greater);
    assert_eq!(natural_cmp("10.0", "10.0"), Ordering::Equal);
    assert_eq!(natural_cmp("20.0", "10.0"), Ordering::Greater);
    assert_eq!(
        natural_cmp("a lot of text 20.0 .", "a lot of text 100.0"),
        Ordering::Less
    );
    assert_eq!(
        natural_cmp("a lot of 7text 20.0 .", "a lot of 3text 100.0"),
        Ordering::Greater
    );
    assert_eq!(natural_cmp("img_007", "img_7"), Ordering::Greater);
    assert_eq!(natural_cmp("", "a"), Ordering::Less);
}
