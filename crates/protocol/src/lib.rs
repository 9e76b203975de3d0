pub mod media;
pub mod services;
pub mod torrent;
pub mod transport;
pub mod types;

// Re-export primary types for convenience.
pub use media::{Encoding, MediaInfo, MediaStream};
pub use services::{
    AbortPredicate, FetchRequest, FetchedFile, Fetcher, MediaResolver, MediaTool, ProgressFn, ServiceError,
    ServiceFuture, TorrentDaemon,
};
pub use torrent::{TorrentFile, TorrentFilter, TorrentInfo, parse_info_hash};
pub use transport::{MessagingTransport, TransportError, TransportFuture};
pub use types::{
    AcquiredPayload, ChatId, DeliveryUnit, MessageId, PayloadItem, Phase, SourceKind,
    TransferRequest, UnitKind, is_media_path,
};
