pub use crate::gemini::content::*;
pub use crate::gemini::generate_content::types::*;
pub use crate::gemini::generate_content::{
    GenerateContentPath, GenerateContentRequestBody, GenerateContentResponse,
};
