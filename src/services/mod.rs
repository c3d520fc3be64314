pub mod aggregator;
pub mod comment;
pub mod connector;
pub mod feed_state;
pub mod feed_store;
pub mod memory;
pub mod profile;
pub mod target;

// 重新导出常用类型
pub use aggregator::{AggregatedFeed, Aggregator};
pub use comment::{CommentContentResolver, CommentStore};
pub use connector::{ActivityStore, RowStream, SourceChange, SourceConnector};
pub use feed_state::FeedState;
pub use feed_store::{FeedHandle, FeedStore};
pub use profile::{ProfileResolver, ProfileStore};
pub use target::{ContentStore, TargetResolver};
