//! Boundaries the domain depends on: image transport and image retrieval.

mod image_retriever_port;
mod image_transport_port;

#[cfg(test)]
pub use image_retriever_port::MockImageRetriever;
pub use image_retriever_port::ImageRetriever;
#[cfg(test)]
pub use image_transport_port::MockImageTransport;
pub use image_transport_port::{ImageTransport, TransportOptions};
