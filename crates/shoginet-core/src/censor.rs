/// Replaces every occurrence of a configured secret (the API key) with a
/// same-length run of `*`, so it never reaches a log sink.
///
/// Built once from the configured key and threaded through every place a
/// log line or its arguments are formatted — not applied after the fact at
/// the sink, which would leave the raw value sitting in memory or on a
/// channel in the meantime.
#[derive(Debug, Clone, Default)]
pub struct Censor {
    keyword: Option<String>,
}

impl Censor {
    /// Builds a censor for the given API key. An empty or absent key
    /// censors nothing.
    pub fn new(key: Option<&str>) -> Self {
        Censor {
            keyword: key.filter(|k| !k.is_empty()).map(str::to_owned),
        }
    }

    /// Redacts every occurrence of the configured keyword in `text`.
    pub fn apply(&self, text: &str) -> String {
        match &self.keyword {
            Some(keyword) if !keyword.is_empty() => {
                let mask = "*".repeat(keyword.len());
                text.replace(keyword.as_str(), &mask)
            }
            _ => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_every_occurrence() {
        let c = Censor::new(Some("ABCD"));
        assert_eq!(c.apply("key is ABCD, again ABCD!"), "key is ****, again ****!");
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let c = Censor::new(Some("ABCD"));
        assert_eq!(c.apply("nothing to see here"), "nothing to see here");
    }

    #[test]
    fn empty_key_censors_nothing() {
        let c = Censor::new(Some(""));
        assert_eq!(c.apply("ABCD"), "ABCD");
    }

    #[test]
    fn no_key_censors_nothing() {
        let c = Censor::new(None);
        assert_eq!(c.apply("ABCD"), "ABCD");
    }
}
