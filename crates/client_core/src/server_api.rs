use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client};
use shared::{
    domain::{BucketKey, Message},
    protocol::{HistoryQuery, Roster},
};
use url::Url;

const DEFAULT_UPLOAD_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[async_trait]
pub trait ChatServerApi: Send + Sync {
    async fn fetch_history(&self, local_identity: &str, peer: &BucketKey) -> Result<Vec<Message>>;
    async fn clear_history(&self, local_identity: &str, peer: &BucketKey) -> Result<()>;
    async fn upload_file(
        &self,
        upload: FileUpload,
        sender: &str,
        receiver: &BucketKey,
    ) -> Result<Message>;
    async fn fetch_roster(&self) -> Result<Roster>;
}

pub struct MissingChatServerApi;

#[async_trait]
impl ChatServerApi for MissingChatServerApi {
    async fn fetch_history(&self, _local_identity: &str, peer: &BucketKey) -> Result<Vec<Message>> {
        Err(anyhow!("chat server unavailable for history of {peer}"))
    }

    async fn clear_history(&self, _local_identity: &str, peer: &BucketKey) -> Result<()> {
        Err(anyhow!("chat server unavailable for clearing {peer}"))
    }

    async fn upload_file(
        &self,
        upload: FileUpload,
        _sender: &str,
        _receiver: &BucketKey,
    ) -> Result<Message> {
        Err(anyhow!(
            "chat server unavailable for upload of '{}'",
            upload.file_name
        ))
    }

    async fn fetch_roster(&self) -> Result<Roster> {
        Err(anyhow!("chat server unavailable for roster"))
    }
}

pub struct HttpChatServer {
    http: Client,
    base_url: Url,
}

impl HttpChatServer {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self> {
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            return Err(anyhow!("server_url must start with http:// or https://"));
        }
        let mut base_url =
            Url::parse(server_url).with_context(|| format!("invalid server_url '{server_url}'"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path '{path}'"))
    }

    fn history_query(local_identity: &str, peer: &BucketKey) -> HistoryQuery {
        HistoryQuery {
            user1: local_identity.to_string(),
            user2: peer.as_wire().to_string(),
        }
    }
}

#[async_trait]
impl ChatServerApi for HttpChatServer {
    async fn fetch_history(&self, local_identity: &str, peer: &BucketKey) -> Result<Vec<Message>> {
        let request = match peer {
            BucketKey::Broadcast => self.http.get(self.endpoint("api/chat-history/public")?),
            BucketKey::Peer(_) => self
                .http
                .get(self.endpoint("api/chat-history")?)
                .query(&Self::history_query(local_identity, peer)),
        };
        let messages: Vec<Message> = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid chat history payload")?;
        Ok(messages)
    }

    async fn clear_history(&self, local_identity: &str, peer: &BucketKey) -> Result<()> {
        self.http
            .delete(self.endpoint("api/clear-chat-history")?)
            .query(&Self::history_query(local_identity, peer))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn upload_file(
        &self,
        upload: FileUpload,
        sender: &str,
        receiver: &BucketKey,
    ) -> Result<Message> {
        let mime_type = upload
            .mime_type
            .clone()
            .unwrap_or_else(|| DEFAULT_UPLOAD_MIME.to_string());
        let part = multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name.clone())
            .mime_str(&mime_type)
            .with_context(|| format!("invalid mime type '{mime_type}'"))?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("sender", sender.to_string())
            .text("receiver", receiver.as_wire().to_string());

        let message: Message = self
            .http
            .post(self.endpoint("api/files/upload")?)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid upload response for '{}'", upload.file_name))?;
        Ok(message)
    }

    async fn fetch_roster(&self) -> Result<Roster> {
        let roster: Roster = self
            .http
            .get(self.endpoint("api/online-users")?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid online users payload")?;
        Ok(roster)
    }
}

#[cfg(test)]
#[path = "tests/server_api_tests.rs"]
mod tests;
