//! Go template support for synthesized charts.
//!
//! Just enough of Helm's template language to render what the emitter writes,
//! so every chart can be verified before it lands on disk.

pub mod helpers;
pub mod parser;
pub mod render;

pub use helpers::{HelperDefinition, HelperRegistry, fullname, fullname_helper, standard_helpers};
pub use parser::{ParsedTemplate, TemplateParseError, TemplateToken, parse_template};
pub use render::{ChartInfo, ReleaseInfo, RenderError, Renderer, go_quote};
