mod body_reader;
mod header_reader;

pub use body_reader::BodyReader;
pub use header_reader::HeaderReader;
