//! Query aspect detection.
//!
//! Each aspect is an independent keyword test over the lowercased query.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    Count,
    Category,
    Status,
    Location,
    Time,
    List,
}

impl Aspect {
    pub const ALL: [Aspect; 6] = [
        Aspect::Count,
        Aspect::Category,
        Aspect::Status,
        Aspect::Location,
        Aspect::Time,
        Aspect::List,
    ];

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Aspect::Count => &["count", "number", "total", "sum", "how many", "most", "least"],
            Aspect::Category => &["category", "type", "classification", "kind"],
            Aspect::Status => &["status", "state", "open", "closed", "pending", "active", "resolved"],
            Aspect::Location => &[
                "location", "where", "place", "building", "site", "address", "zone", "area",
            ],
            Aspect::Time => &[
                "time", "date", "when", "period", "during", "recent", "latest", "oldest", "day",
                "week", "month", "year", "last", "since", "ago", "today", "yesterday",
            ],
            Aspect::List => &["list", "show", "display", "get", "provide", "find"],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAspects {
    pub count: bool,
    pub category: bool,
    pub status: bool,
    pub location: bool,
    pub time: bool,
    pub list: bool,
}

impl QueryAspects {
    pub fn detect(query: &str) -> Self {
        let lowered = query.to_lowercase();
        let hit = |aspect: Aspect| aspect.keywords().iter().any(|kw| lowered.contains(kw));
        Self {
            count: hit(Aspect::Count),
            category: hit(Aspect::Category),
            status: hit(Aspect::Status),
            location: hit(Aspect::Location),
            time: hit(Aspect::Time),
            list: hit(Aspect::List),
        }
    }

    pub fn has(&self, aspect: Aspect) -> bool {
        match aspect {
            Aspect::Count => self.count,
            Aspect::Category => self.category,
            Aspect::Status => self.status,
            Aspect::Location => self.location,
            Aspect::Time => self.time,
            Aspect::List => self.list,
        }
    }

    pub fn active(&self) -> Vec<Aspect> {
        Aspect::ALL.into_iter().filter(|a| self.has(*a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_and_status() {
        let aspects = QueryAspects::detect("how many incidents are open");
        assert_eq!(
            aspects,
            QueryAspects {
                count: true,
                status: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_list_location_time() {
        let aspects = QueryAspects::detect("list incidents in building A from the last 7 days");
        assert_eq!(
            aspects.active(),
            vec![Aspect::Location, Aspect::Time, Aspect::List]
        );
    }

    #[test]
    fn test_case_insensitive_and_empty() {
        assert!(QueryAspects::detect("SHOW ME THE STATUS").status);
        assert_eq!(QueryAspects::detect(""), QueryAspects::default());
        assert!(QueryAspects::detect("nothing relevant here").active().is_empty());
    }

    #[test]
    fn test_aspects_do_not_suppress_each_other() {
        let aspects = QueryAspects::detect(
            "show the total count per category and status by building for last week",
        );
        assert_eq!(aspects.active(), Aspect::ALL.to_vec());
    }
}
