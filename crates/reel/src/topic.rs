use std::fmt;
use std::path::Path;
use std::str::FromStr;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Content category a reel is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Arrays,
    Graphs,
    LinkedList,
    Queue,
    Stack,
    Trees,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::Arrays,
        Topic::Graphs,
        Topic::LinkedList,
        Topic::Queue,
        Topic::Stack,
        Topic::Trees,
    ];

    /// Directory name under the content root
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Arrays => "arrays",
            Topic::Graphs => "graphs",
            Topic::LinkedList => "linked_list",
            Topic::Queue => "queue",
            Topic::Stack => "stack",
            Topic::Trees => "trees",
        }
    }

    /// Human-readable name used in narration prompts
    pub fn display_name(&self) -> &'static str {
        match self {
            Topic::Arrays => "arrays",
            Topic::Graphs => "graphs",
            Topic::LinkedList => "linked lists",
            Topic::Queue => "queues",
            Topic::Stack => "stacks",
            Topic::Trees => "trees",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase().replace(['-', ' '], "_");
        Topic::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| {
                let valid: Vec<&str> = Topic::ALL.iter().map(|t| t.as_str()).collect();
                anyhow!("unknown topic '{}'. Valid topics: {}", s, valid.join(", "))
            })
    }
}

/// Topics that have a content directory under `content_root`, sorted
pub fn available_topics(content_root: &Path) -> Vec<Topic> {
    Topic::ALL
        .iter()
        .copied()
        .filter(|t| content_root.join(t.as_str()).is_dir())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_directory_names() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
        }
    }

    #[test]
    fn test_parse_is_lenient_about_separators() {
        assert_eq!("Linked List".parse::<Topic>().unwrap(), Topic::LinkedList);
        assert_eq!("linked-list".parse::<Topic>().unwrap(), Topic::LinkedList);
        assert_eq!(" GRAPHS ".parse::<Topic>().unwrap(), Topic::Graphs);
    }

    #[test]
    fn test_unknown_topic_lists_valid_ones() {
        let err = "random_clips".parse::<Topic>().unwrap_err().to_string();
        assert!(err.contains("arrays, graphs, linked_list, queue, stack, trees"), "{}", err);
    }

    #[test]
    fn test_available_topics_only_existing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("graphs")).unwrap();
        std::fs::create_dir_all(dir.path().join("trees")).unwrap();
        std::fs::create_dir_all(dir.path().join("random_clips")).unwrap();

        assert_eq!(available_topics(dir.path()), vec![Topic::Graphs, Topic::Trees]);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Topic::LinkedList).unwrap();
        assert_eq!(json, "\"linked_list\"");
    }
}
