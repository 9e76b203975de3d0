//! Console stand-in for the chat transport.
//!
//! Text messages and edits are printed to stdout; attachments are copied
//! into an output directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

use courier_protocol::{ChatId, MessageId, MessagingTransport, TransportError, TransportFuture};

pub struct ConsoleTransport {
    out_dir: PathBuf,
    next_id: AtomicI32,
}

impl ConsoleTransport {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            next_id: AtomicI32::new(1),
        }
    }

    async fn deliver(&self, chat: ChatId, path: &Path, caption: &str) -> Result<(), TransportError> {
        let name = path
            .file_name()
            .ok_or_else(|| TransportError::Other(format!("{} has no file name", path.display())))?;
        let dest = self.out_dir.join(name);

        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let bytes = tokio::fs::copy(path, &dest)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        tracing::info!(chat, file = %dest.display(), bytes, "attachment delivered");
        println!("📎 {caption} -> {}", dest.display());
        Ok(())
    }
}

impl MessagingTransport for ConsoleTransport {
    fn send_text<'a>(&'a self, chat: ChatId, text: &'a str) -> TransportFuture<'a, MessageId> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(chat, message = id, "text sent");
            println!("{text}");
            Ok(MessageId(id))
        })
    }

    fn edit_text<'a>(
        &'a self,
        chat: ChatId,
        message: MessageId,
        text: &'a str,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(chat, message = message.0, "text edited");
            println!("{text}");
            Ok(())
        })
    }

    fn delete_message(&self, chat: ChatId, message: MessageId) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            tracing::debug!(chat, message = message.0, "message deleted");
            Ok(())
        })
    }

    fn send_document<'a>(
        &'a self,
        chat: ChatId,
        path: &'a Path,
        caption: &'a str,
    ) -> TransportFuture<'a, ()> {
        Box::pin(self.deliver(chat, path, caption))
    }

    fn send_video<'a>(
        &'a self,
        chat: ChatId,
        path: &'a Path,
        caption: &'a str,
    ) -> TransportFuture<'a, ()> {
        Box::pin(self.deliver(chat, path, caption))
    }
}
