// A "view" is one pagination stream of the posts endpoint: a sort order
// plus an optional time window. No single view pages reliably, so a full
// crawl walks several overlapping views; the contract is coverage, not
// exhaustiveness.

/// One (sort, time-window) pagination stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub sort: String,
    pub window: Option<String>,
}

impl View {
    pub fn new(sort: &str, window: Option<&str>) -> Self {
        Self {
            sort: sort.to_string(),
            window: window.map(str::to_string),
        }
    }

    /// Name of the checkpoint property on the Crawl node.
    pub fn checkpoint_key(&self) -> String {
        format!(
            "posts_offset_{}_{}",
            self.sort,
            self.window.as_deref().unwrap_or("na")
        )
    }

    /// Only reverse-chronological views can be cutoff-bounded: every other
    /// sort interleaves old and new items, so an old item proves nothing.
    pub fn is_chronological(&self) -> bool {
        self.sort == "new" && self.window.is_none()
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.sort, self.window.as_deref().unwrap_or("-"))
    }
}

/// Default full-crawl view set.
pub fn default_views() -> Vec<View> {
    vec![
        View::new("new", None),
        View::new("top", Some("day")),
        View::new("top", Some("week")),
        View::new("top", Some("month")),
        View::new("top", Some("year")),
        View::new("top", Some("all")),
        View::new("hot", Some("day")),
        View::new("hot", Some("week")),
    ]
}

/// Parse the `sort:window|sort:window` override format; an empty window
/// part (`new:`) or a bare sort (`new`) means no time window.
pub fn parse_views(raw: &str) -> Vec<View> {
    raw.split('|')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            match part.split_once(':') {
                Some((sort, window)) => {
                    let window = window.trim();
                    Some(View::new(
                        sort.trim(),
                        (!window.is_empty()).then_some(window),
                    ))
                }
                None => Some(View::new(part, None)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_override_format() {
        let views = parse_views("new:|top:day|hot:week");
        assert_eq!(views.len(), 3);
        assert_eq!(views[0], View::new("new", None));
        assert_eq!(views[1], View::new("top", Some("day")));
        assert_eq!(views[2], View::new("hot", Some("week")));
    }

    #[test]
    fn parses_bare_sort_and_skips_empty_parts() {
        let views = parse_views("new||top:all|");
        assert_eq!(views.len(), 2);
        assert_eq!(views[0], View::new("new", None));
        assert_eq!(views[1], View::new("top", Some("all")));
    }

    #[test]
    fn checkpoint_keys_distinguish_views() {
        assert_eq!(View::new("new", None).checkpoint_key(), "posts_offset_new_na");
        assert_eq!(
            View::new("top", Some("week")).checkpoint_key(),
            "posts_offset_top_week"
        );
    }

    #[test]
    fn only_unwindowed_new_is_chronological() {
        assert!(View::new("new", None).is_chronological());
        assert!(!View::new("new", Some("day")).is_chronological());
        assert!(!View::new("top", None).is_chronological());
        assert!(!View::new("hot", Some("week")).is_chronological());
    }
}
