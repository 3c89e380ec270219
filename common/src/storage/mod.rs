// Storage module: remote log destinations

pub mod s3;
pub mod writer;

pub use s3::S3Client;
pub use writer::{RemoteWriter, RemoteWriterFactory, S3LogWriter, S3WriterFactory};
