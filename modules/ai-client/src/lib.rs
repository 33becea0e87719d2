pub mod claude;
pub mod traits;
pub mod util;

pub use claude::Claude;
pub use traits::CompletionAgent;
pub use util::{extract_json, strip_code_blocks};
