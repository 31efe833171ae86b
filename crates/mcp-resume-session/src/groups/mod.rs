//! Built-in tool groups.

mod combined;
mod provider;
mod utility;

pub use combined::CombinedGroup;
pub use provider::{ProviderGroup, UpstreamTool};
pub use utility::UtilityGroup;

/// Ticket tracker provider.
pub const JIRA: &str = "jira";
/// Design tool provider.
pub const FIGMA: &str = "figma";
/// Document store provider.
pub const CONFLUENCE: &str = "confluence";
