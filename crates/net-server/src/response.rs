use crate::handler::{Message, ResponseRefiner};
use crate::writer::{size_header_job, WriteJob};

/// Applies the ordered chain of response refiners to a handler's raw
/// output, then hands the result to [`size_header_job`] so the size prefix
/// and payload land in a single contiguous buffer.
pub struct ResponseAssembly<T> {
    header_size: u8,
    refiners: Vec<Box<dyn ResponseRefiner<T>>>,
}

impl<T> ResponseAssembly<T> {
    pub fn new(header_size: u8, refiners: Vec<Box<dyn ResponseRefiner<T>>>) -> Self {
        Self { header_size, refiners }
    }

    pub fn assemble(&self, request: &Message<T>, mut buf: Vec<u8>) -> WriteJob {
        for refiner in &self.refiners {
            buf = refiner.execute(&request.value, buf);
        }
        size_header_job(self.header_size, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Uppercase;
    impl ResponseRefiner<()> for Uppercase {
        fn execute(&self, _message: &(), buf: Vec<u8>) -> Vec<u8> {
            buf.into_iter().map(|b| b.to_ascii_uppercase()).collect()
        }
    }

    #[test]
    fn applies_refiners_in_order_then_frames() {
        let assembly = ResponseAssembly::new(4, vec![Box::new(Uppercase)]);
        let request = Message { value: (), raw: Vec::new() };
        let job = assembly.assemble(&request, b"hi".to_vec());
        assert_eq!(job.total_size(), 6);
    }
}
