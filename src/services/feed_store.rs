use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::{future::join_all, stream::BoxStream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    config::FeedConfig,
    error::{AppError, Result},
    models::{FeedSnapshot, Notification, NotificationKey, NotificationSource},
    services::{
        aggregator::{AggregatedFeed, Aggregator},
        connector::{SourceChange, SourceConnector},
        feed_state::{FeedState, UpsertOutcome},
    },
    utils::text::normalize_address,
};

/// 来自 FeedHandle 的命令
enum Command {
    Open {
        recipient: String,
        reply: oneshot::Sender<()>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Refresh {
        reply: oneshot::Sender<()>,
    },
    MarkRead {
        key: NotificationKey,
        reply: oneshot::Sender<bool>,
    },
    MarkAllRead {
        reply: oneshot::Sender<usize>,
    },
    Delete {
        key: NotificationKey,
        reply: oneshot::Sender<bool>,
    },
}

/// 后台任务回送给 actor 的事件，全部带有会话编号
enum Internal {
    Loaded {
        session: u64,
        feed: AggregatedFeed,
        streams: Vec<(NotificationSource, BoxStream<'static, SourceChange>)>,
    },
    Change {
        session: u64,
        source: NotificationSource,
        change: SourceChange,
    },
    Settled {
        session: u64,
        notification: Notification,
    },
    AllReadWritten {
        session: u64,
        succeeded: Vec<NotificationSource>,
        reply: oneshot::Sender<usize>,
    },
}

struct Session {
    id: u64,
    recipient: String,
    loading: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    /// 取消批量拉取、订阅转发与补全任务
    fn teardown(self) {
        for task in self.tasks {
            task.abort();
        }
        debug!("Session {} for {} torn down", self.id, self.recipient);
    }
}

/// 实时通知流存储，当前接收者通知流的唯一持有者
///
/// 所有修改都经由 [`FeedStore::spawn`] 启动的 actor 任务串行执行，
/// 消费方通过 [`FeedHandle::watch`] 读取快照。
/// 已读和删除先在本地生效再后台写入存储，写入失败只记录日志不回滚，
/// 调用 [`FeedHandle::refresh`] 与存储重新对齐。
pub struct FeedStore {
    connectors: HashMap<NotificationSource, SourceConnector>,
    aggregator: Aggregator,
    config: FeedConfig,
    state: FeedState,
    session: Option<Session>,
    next_session: u64,
    internal_tx: mpsc::UnboundedSender<Internal>,
    snapshot_tx: watch::Sender<FeedSnapshot>,
}

impl FeedStore {
    pub fn spawn(
        connectors: Vec<SourceConnector>,
        aggregator: Aggregator,
        config: &FeedConfig,
    ) -> FeedHandle {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(FeedSnapshot::default());

        let store = FeedStore {
            connectors: connectors.into_iter().map(|c| (c.source(), c)).collect(),
            aggregator,
            config: config.clone(),
            state: FeedState::new(),
            session: None,
            next_session: 1,
            internal_tx,
            snapshot_tx,
        };

        tokio::spawn(store.run(command_rx, internal_rx));

        FeedHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!("Feed store started with {} sources", self.connectors.len());
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event),
            }
        }

        if let Some(session) = self.session.take() {
            session.teardown();
        }
        info!("Feed store stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open { recipient, reply } => {
                self.open_session(normalize_address(&recipient));
                let _ = reply.send(());
            }
            Command::Close { reply } => {
                self.close_session();
                let _ = reply.send(());
            }
            Command::Refresh { reply } => {
                if let Some(recipient) = self.session.as_ref().map(|s| s.recipient.clone()) {
                    self.open_session(recipient);
                }
                let _ = reply.send(());
            }
            Command::MarkRead { key, reply } => {
                let _ = reply.send(self.mark_read(key));
            }
            Command::MarkAllRead { reply } => self.mark_all_read(reply),
            Command::Delete { key, reply } => {
                let _ = reply.send(self.delete(key));
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Loaded {
                session,
                feed,
                streams,
            } => {
                if !self.is_current(session) {
                    debug!("Discarding bulk load for stale session {}", session);
                    return;
                }
                self.state.replace_all(feed.notifications);
                for (source, stream) in streams {
                    let task = self.forward_changes(session, source, stream);
                    if let Some(current) = self.session.as_mut() {
                        current.track(task);
                    }
                }
                if let Some(current) = self.session.as_mut() {
                    current.loading = false;
                    info!(
                        "Feed for {} loaded: {} notifications, {} unread",
                        current.recipient,
                        self.state.len(),
                        self.state.unread_count()
                    );
                }
                self.publish();
            }
            Internal::Change {
                session,
                source,
                change,
            } => {
                if self.is_current(session) {
                    self.apply_change(session, source, change);
                }
            }
            Internal::Settled {
                session,
                notification,
            } => {
                if self.is_current(session) && self.state.settle(notification) {
                    self.publish();
                }
            }
            Internal::AllReadWritten {
                session,
                succeeded,
                reply,
            } => {
                let mut flipped = 0;
                if self.is_current(session) {
                    let now = Utc::now();
                    for source in succeeded {
                        flipped += self.state.mark_source_read(source, now);
                    }
                    self.publish();
                }
                let _ = reply.send(flipped);
            }
        }
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.as_ref().map(|s| s.id) == Some(session)
    }

    fn open_session(&mut self, recipient: String) {
        if let Some(previous) = self.session.take() {
            previous.teardown();
        }
        self.state.clear();

        let id = self.next_session;
        self.next_session += 1;
        info!("Opening feed session {} for {}", id, recipient);

        let task = self.spawn_load(id, recipient.clone());
        self.session = Some(Session {
            id,
            recipient,
            loading: true,
            tasks: vec![task],
        });
        self.publish();
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Closing feed session {}", session.id);
            session.teardown();
        }
        self.state.clear();
        self.publish();
    }

    /// 订阅全部来源后并行拉取；订阅先于拉取，拉取期间的变更缓存在流中，
    /// 加载完成后再按 upsert 语义合并
    fn spawn_load(&self, session: u64, recipient: String) -> JoinHandle<()> {
        let connectors: Vec<SourceConnector> = self.connectors.values().cloned().collect();
        let aggregator = self.aggregator.clone();
        let timeout = self.config.fetch_timeout();
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let subscriptions = join_all(connectors.iter().map(|connector| {
                let recipient = recipient.as_str();
                async move {
                    match connector.subscribe(recipient).await {
                        Ok(stream) => Some((connector.source(), stream)),
                        Err(e) => {
                            warn!("Subscription for {:?} failed: {}", connector.source(), e);
                            None
                        }
                    }
                }
            }))
            .await;
            let streams = subscriptions.into_iter().flatten().collect();

            let fetches = join_all(connectors.iter().map(|connector| {
                let recipient = recipient.as_str();
                async move {
                    let source = connector.source();
                    match tokio::time::timeout(timeout, connector.fetch_all(recipient)).await {
                        Ok(Ok(events)) => events.into_iter().map(|e| (source, e)).collect(),
                        Ok(Err(e)) => {
                            error!("Bulk fetch for {:?} failed: {}", source, e);
                            Vec::new()
                        }
                        Err(_) => {
                            error!("Bulk fetch for {:?} timed out", source);
                            Vec::new()
                        }
                    }
                }
            }))
            .await;

            let events: Vec<_> = fetches.into_iter().flatten().collect();
            let feed = aggregator.aggregate(events).await;

            let _ = tx.send(Internal::Loaded {
                session,
                feed,
                streams,
            });
        })
    }

    fn forward_changes(
        &self,
        session: u64,
        source: NotificationSource,
        mut stream: BoxStream<'static, SourceChange>,
    ) -> JoinHandle<()> {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(change) = stream.next().await {
                if tx
                    .send(Internal::Change {
                        session,
                        source,
                        change,
                    })
                    .is_err()
                {
                    break;
                }
            }
            debug!("Change stream for {:?} ended", source);
        })
    }

    fn apply_change(&mut self, session: u64, source: NotificationSource, change: SourceChange) {
        match change {
            SourceChange::Insert(event) | SourceChange::Update(event) => {
                let pending = Aggregator::pending(source, event.clone());
                if self.state.upsert(pending) == UpsertOutcome::Inserted {
                    debug!("Live insert {:?}:{}", source, event.id);
                    let aggregator = self.aggregator.clone();
                    let tx = self.internal_tx.clone();
                    let task = tokio::spawn(async move {
                        let notification = aggregator.enrich_one(source, event).await;
                        let _ = tx.send(Internal::Settled {
                            session,
                            notification,
                        });
                    });
                    if let Some(current) = self.session.as_mut() {
                        current.track(task);
                    }
                }
            }
            SourceChange::Delete { id } => {
                let key = NotificationKey::new(source, id);
                if self.state.remove(&key).is_some() {
                    debug!("Live delete {:?}:{}", key.source, key.id);
                }
            }
        }
        self.publish();
    }

    fn mark_read(&mut self, key: NotificationKey) -> bool {
        if !self.state.mark_read(&key, Utc::now()) {
            return false;
        }
        self.publish();

        match self.connectors.get(&key.source).cloned() {
            Some(connector) => {
                tokio::spawn(async move {
                    if let Err(e) = connector.mark_read(&key.id).await {
                        warn!("Persisting read state for {:?}:{} failed: {}", key.source, key.id, e);
                    }
                });
            }
            None => warn!("No connector for {:?}", key.source),
        }
        true
    }

    fn mark_all_read(&mut self, reply: oneshot::Sender<usize>) {
        let Some(session) = self.session.as_ref() else {
            let _ = reply.send(0);
            return;
        };
        let session_id = session.id;
        let recipient = session.recipient.clone();
        let connectors: Vec<SourceConnector> = self.connectors.values().cloned().collect();
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let results = join_all(connectors.iter().map(|connector| {
                let recipient = recipient.as_str();
                async move { (connector.source(), connector.mark_all_read(recipient).await) }
            }))
            .await;

            let succeeded = results
                .into_iter()
                .filter_map(|(source, result)| match result {
                    Ok(()) => Some(source),
                    Err(e) => {
                        warn!("Mark-all-read for {:?} failed: {}", source, e);
                        None
                    }
                })
                .collect();

            let _ = tx.send(Internal::AllReadWritten {
                session: session_id,
                succeeded,
                reply,
            });
        });
    }

    fn delete(&mut self, key: NotificationKey) -> bool {
        if self.state.remove(&key).is_none() {
            return false;
        }
        self.publish();

        match self.connectors.get(&key.source).cloned() {
            Some(connector) => {
                tokio::spawn(async move {
                    if let Err(e) = connector.delete(&key.id).await {
                        warn!("Persisting delete for {:?}:{} failed: {}", key.source, key.id, e);
                    }
                });
            }
            None => warn!("No connector for {:?}", key.source),
        }
        true
    }

    fn publish(&self) {
        let snapshot = FeedSnapshot {
            recipient: self.session.as_ref().map(|s| s.recipient.clone()),
            notifications: self.state.notifications().to_vec(),
            unread_count: self.state.unread_count(),
            loading: self.session.as_ref().map(|s| s.loading).unwrap_or(false),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

/// 运行中 [`FeedStore`] 的句柄，可克隆
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<FeedSnapshot>,
}

impl FeedHandle {
    /// 切换到新的接收者；旧会话的订阅会先被取消
    pub async fn open(&self, recipient: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Open {
                recipient: recipient.to_string(),
                reply,
            })
            .await?;
        Ok(rx.await?)
    }

    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Close { reply }).await?;
        Ok(rx.await?)
    }

    /// 重新批量加载当前接收者，用于与存储重新对齐
    pub async fn refresh(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Refresh { reply }).await?;
        Ok(rx.await?)
    }

    /// 返回本地状态是否发生了变化
    pub async fn mark_as_read(&self, key: NotificationKey) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::MarkRead { key, reply }).await?;
        Ok(rx.await?)
    }

    /// 返回被标记为已读的条数
    pub async fn mark_all_as_read(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::MarkAllRead { reply }).await?;
        Ok(rx.await?)
    }

    pub async fn delete(&self, key: NotificationKey) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Delete { key, reply }).await?;
        Ok(rx.await?)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.snapshots.borrow().unread_count
    }

    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshots.clone()
    }

    /// 等待当前会话的批量加载完成
    pub async fn wait_until_loaded(&self) -> Result<FeedSnapshot> {
        let mut rx = self.watch();
        let snapshot = rx
            .wait_for(|s| s.recipient.is_some() && !s.loading)
            .await
            .map_err(|_| AppError::SessionClosed)?;
        Ok(snapshot.clone())
    }
}
