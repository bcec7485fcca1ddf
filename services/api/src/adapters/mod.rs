pub mod completion_llm;
pub mod db;
pub mod renderer;

pub use completion_llm::OpenAiCompletionAdapter;
pub use db::DbAdapter;
pub use renderer::FilePaperRenderer;
