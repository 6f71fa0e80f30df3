pub mod gemini;
pub mod router;

pub use gemini::GeminiProvider;
pub use router::RouterProvider;
