mod client;

pub use client::{ApiErrorClass, BucketClient, BucketError, FileEntry};
