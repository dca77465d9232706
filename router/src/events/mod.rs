//! イベントハブ
//!
//! ノードのイベントを `/events` リスナーへ配信する。リスナーはリモートアドレスを
//! キーとする有界チャネルを持ち、読み取りが止まったか切断されたリスナーは
//! 次の配信時に外される。

use bytes::Bytes;
use fleet_common::protocol::Event;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// 停滞とみなすまでにリスナーごとにバッファするイベント数
const LISTENER_BUFFER: usize = 256;

/// イベントハブ
#[derive(Clone, Default)]
pub struct EventsHub {
    listeners: Arc<RwLock<HashMap<String, mpsc::Sender<Bytes>>>>,
}

/// 登録済みリスナー（drop時に自身を登録解除する）
pub struct Listener {
    key: String,
    receiver: mpsc::Receiver<Bytes>,
    hub: EventsHub,
}

impl Listener {
    /// 次のシリアライズ済みイベント。ハブから外されたら `None`
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.receiver.close();
        let hub = self.hub.clone();
        let key = std::mem::take(&mut self.key);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                hub.remove_closed(&key).await;
            });
        }
    }
}

impl EventsHub {
    /// Empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// `key` でリスナーを登録（既存のものは置き換える）
    pub async fn add(&self, key: impl Into<String>) -> Listener {
        let key = key.into();
        let (sender, receiver) = mpsc::channel(LISTENER_BUFFER);
        self.listeners.write().await.insert(key.clone(), sender);
        debug!(listener = %key, "Events listener added");
        Listener {
            key,
            receiver,
            hub: self.clone(),
        }
    }

    /// `key` のリスナーを登録解除
    pub async fn remove(&self, key: &str) {
        if self.listeners.write().await.remove(key).is_some() {
            debug!(listener = %key, "Events listener removed");
        }
    }

    /// 受信側が無くなっている場合のみ `key` を削除する（同じキーの新しいリスナーは残る）
    async fn remove_closed(&self, key: &str) {
        let mut listeners = self.listeners.write().await;
        if listeners.get(key).is_some_and(|sender| sender.is_closed()) {
            listeners.remove(key);
            debug!(listener = %key, "Events listener disconnected");
        }
    }

    /// 接続中のリスナー数
    pub async fn size(&self) -> usize {
        self.listeners
            .read()
            .await
            .values()
            .filter(|sender| !sender.is_closed())
            .count()
    }

    /// 全リスナーにイベントを配信する
    ///
    /// 切断済み、または `LISTENER_BUFFER` 件以上遅れているリスナーは外す。
    pub async fn handle(&self, event: &Event) {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => Bytes::from(payload),
            Err(err) => {
                warn!(error = %err, "Failed to serialize event");
                return;
            }
        };

        let mut listeners = self.listeners.write().await;
        listeners.retain(|key, sender| match sender.try_send(payload.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(listener = %key, "Events listener stalled, dropping it");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(listener = %key, "Events listener closed");
                false
            }
        });
    }
}
