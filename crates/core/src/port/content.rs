// Content Resolver Port
//
// Maps a content path to the page's question items. Page rendering is out
// of scope; graders only need each item's kind, weight, and config.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

fn default_points() -> f64 {
    1.0
}

/// One gradable item on a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSpec {
    pub name: String,
    /// Grader registry key ("literal", "number", ...).
    pub kind: String,
    /// Weight toward the aggregate score.
    #[serde(default = "default_points")]
    pub points: f64,
    /// Kind-specific configuration, passed to the grader verbatim.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// The gradable items of one page, in page order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageContext {
    pub items: Vec<ItemSpec>,
}

impl PageContext {
    pub fn item(&self, name: &str) -> Option<&ItemSpec> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn total_points(&self) -> f64 {
        self.items.iter().map(|i| i.points).sum()
    }
}

#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Page context for a content path. `NotFound` if the path does not
    /// name a page.
    async fn resolve(&self, path: &[String]) -> Result<PageContext>;
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

pub mod mocks {
    use super::*;

    /// Resolver that returns the same context for every path.
    pub struct FixedResolver {
        pub context: PageContext,
    }

    impl FixedResolver {
        pub fn with_items(items: Vec<ItemSpec>) -> Self {
            Self {
                context: PageContext { items },
            }
        }
    }

    #[async_trait]
    impl ContentResolver for FixedResolver {
        async fn resolve(&self, _path: &[String]) -> Result<PageContext> {
            Ok(self.context.clone())
        }
    }
}
