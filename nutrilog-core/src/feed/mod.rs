mod listener;

pub use listener::{ChangeFeedListener, FeedHandle, ListenerOptions};
