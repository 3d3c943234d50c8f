pub mod generate_content;
pub mod model_map;

pub use generate_content::request::transform_request;
pub use generate_content::response::transform_response;
pub use generate_content::stream::GeminiToOpenAIChatCompletionStreamState;
pub use model_map::map_model;
