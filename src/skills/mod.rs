//! Skills: named capabilities the pipeline runs in order.
//!
//! A skill reads the task context, calls its allowed tools, and reports a
//! [`SkillResult`]. Skills are registered once at startup in a
//! [`SkillRegistry`] and looked up by the names the router chose.

pub mod code_change;
pub mod firebase_context;
pub mod github_context;
pub mod netlify_deploy;
pub mod notion_read;
pub mod notion_write;
mod registry;
mod skill;

pub use code_change::CodeChangeSkill;
pub use firebase_context::FirebaseContextSkill;
pub use github_context::GitHubContextSkill;
pub use netlify_deploy::NetlifyDeploySkill;
pub use notion_read::NotionReadSkill;
pub use notion_write::NotionWriteSkill;
pub use registry::SkillRegistry;
pub use skill::{Skill, SkillResult, SkillStatus};
