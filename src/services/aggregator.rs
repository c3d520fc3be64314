use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use crate::{
    models::{
        Notification, NotificationSource, NotificationStatus, NotificationType, RawEvent,
        TargetType,
    },
    services::{
        comment::CommentContentResolver,
        profile::{ProfileResolver, ProfileStore},
        target::TargetResolver,
    },
    utils::text::{shorten_address, ELLIPSIS},
};

const ACTOR_TOKEN: &str = "{actor}";
const TITLE_TOKEN: &str = "{title}";
const COMMENT_TOKEN: &str = "{comment}";

/// 每种通知类型的消息模板
pub fn message_template(kind: NotificationType) -> &'static str {
    match kind {
        NotificationType::Like => "{actor} liked your post: {title}",
        NotificationType::LikeReply => "{actor} liked your reply: {title}",
        NotificationType::Reply => "{actor} replied: {title}",
        NotificationType::NestedReply => "{actor} replied to your reply: {title}",
        NotificationType::Follow => "{actor} started following you",
        NotificationType::VideoPurchase => "{actor} purchased your video: {title}",
        NotificationType::VideoLike => "{actor} liked your video: {title}",
        NotificationType::VideoComment => {
            "{actor} commented on your video \"{title}\": \"{comment}\""
        }
    }
}

/// 单遍替换模板占位符；被替换进来的内容不会再次展开。
/// 缺失的标题或评论替换为省略号，输出中不会残留占位符。
pub fn render_message(
    kind: NotificationType,
    actor: &str,
    title: Option<&str>,
    comment: Option<&str>,
) -> String {
    let template = message_template(kind);
    let title = title.unwrap_or(ELLIPSIS);
    let comment = comment.unwrap_or(ELLIPSIS);

    let mut out = String::with_capacity(template.len() + actor.len() + title.len() + comment.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let (value, consumed) = if tail.starts_with(ACTOR_TOKEN) {
            (actor, ACTOR_TOKEN.len())
        } else if tail.starts_with(TITLE_TOKEN) {
            (title, TITLE_TOKEN.len())
        } else if tail.starts_with(COMMENT_TOKEN) {
            (comment, COMMENT_TOKEN.len())
        } else {
            ("{", 1)
        };
        out.push_str(value);
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}

/// 按 created_at 倒序稳定排序
pub fn sort_feed(notifications: &mut [Notification]) {
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

pub fn count_unread(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.is_read).count()
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedFeed {
    pub notifications: Vec<Notification>,
}

struct Enrichment {
    actor_name: String,
    actor_avatar: Option<String>,
    target_title: Option<String>,
    comment_text: Option<String>,
}

/// 聚合器：原始事件 + 补全信息 -> 最终通知
#[derive(Clone)]
pub struct Aggregator {
    profiles: Arc<dyn ProfileStore>,
    targets: TargetResolver,
    comments: CommentContentResolver,
}

impl Aggregator {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        targets: TargetResolver,
        comments: CommentContentResolver,
    ) -> Self {
        Self {
            profiles,
            targets,
            comments,
        }
    }

    /// 批量聚合一次完整拉取的结果
    pub async fn aggregate(&self, events: Vec<(NotificationSource, RawEvent)>) -> AggregatedFeed {
        if events.is_empty() {
            return AggregatedFeed::default();
        }

        let profiles = ProfileResolver::new(self.profiles.clone());

        let mut target_requests: HashMap<TargetType, HashSet<String>> = HashMap::new();
        for (source, event) in &events {
            let target_type = source.schema().target_type;
            if target_type != TargetType::Profile {
                target_requests
                    .entry(target_type)
                    .or_default()
                    .insert(event.target_id.clone());
            }
        }

        let actors: HashSet<&str> = events.iter().map(|(_, e)| e.actor.as_str()).collect();
        let actor_lookups = join_all(actors.into_iter().map(|actor| {
            let profiles = &profiles;
            async move { (actor.to_string(), profiles.display_name(actor).await) }
        }));

        let comment_lookups = join_all(
            events
                .iter()
                .filter(|(source, _)| *source == NotificationSource::VideoComment)
                .map(|(_, event)| async move {
                    let text = self
                        .comments
                        .resolve(&event.target_id, &event.actor, event.created_at)
                        .await;
                    (event.id.clone(), text)
                }),
        );

        let (titles, actor_names, comment_texts) = futures::join!(
            self.targets.resolve_all(target_requests),
            actor_lookups,
            comment_lookups
        );

        let actor_names: HashMap<String, (String, Option<String>)> =
            actor_names.into_iter().collect();
        let comment_texts: HashMap<String, Option<String>> = comment_texts.into_iter().collect();

        let mut notifications: Vec<Notification> = events
            .into_iter()
            .map(|(source, event)| {
                let target_type = source.schema().target_type;
                let (actor_name, actor_avatar) = actor_names
                    .get(&event.actor)
                    .cloned()
                    .unwrap_or_else(|| (shorten_address(&event.actor), None));
                let target_title = titles.get(&(target_type, event.target_id.clone())).cloned();
                let comment_text = if source == NotificationSource::VideoComment {
                    comment_texts.get(&event.id).cloned().flatten()
                } else {
                    None
                };

                build_notification(
                    source,
                    event,
                    Enrichment {
                        actor_name,
                        actor_avatar,
                        target_title,
                        comment_text,
                    },
                    NotificationStatus::Settled,
                )
            })
            .collect();

        sort_feed(&mut notifications);
        let unread_count = count_unread(&notifications);
        info!(
            "Aggregated {} notifications ({} unread)",
            notifications.len(),
            unread_count
        );

        AggregatedFeed { notifications }
    }

    /// 实时插入的单条补全
    pub async fn enrich_one(&self, source: NotificationSource, event: RawEvent) -> Notification {
        let profiles = ProfileResolver::new(self.profiles.clone());
        let target_type = source.schema().target_type;

        let comment_lookup = async {
            if source == NotificationSource::VideoComment {
                self.comments
                    .resolve(&event.target_id, &event.actor, event.created_at)
                    .await
            } else {
                None
            }
        };

        let ((actor_name, actor_avatar), target_title, comment_text) = futures::join!(
            profiles.display_name(&event.actor),
            self.targets.resolve_one(target_type, &event.target_id),
            comment_lookup
        );

        debug!("Enriched {:?}:{}", source, event.id);
        build_notification(
            source,
            event,
            Enrichment {
                actor_name,
                actor_avatar,
                target_title,
                comment_text,
            },
            NotificationStatus::Settled,
        )
    }

    /// 补全完成前的占位通知
    pub fn pending(source: NotificationSource, event: RawEvent) -> Notification {
        let actor_name = shorten_address(&event.actor);
        build_notification(
            source,
            event,
            Enrichment {
                actor_name,
                actor_avatar: None,
                target_title: None,
                comment_text: None,
            },
            NotificationStatus::Pending,
        )
    }
}

fn build_notification(
    source: NotificationSource,
    event: RawEvent,
    enrichment: Enrichment,
    status: NotificationStatus,
) -> Notification {
    let schema = source.schema();
    let message = render_message(
        schema.notification_type,
        &enrichment.actor_name,
        enrichment.target_title.as_deref(),
        enrichment.comment_text.as_deref(),
    );

    Notification {
        id: event.id,
        source,
        recipient_address: event.recipient,
        actor_address: event.actor,
        actor_display_name: enrichment.actor_name,
        actor_avatar: enrichment.actor_avatar,
        notification_type: schema.notification_type,
        target_id: event.target_id,
        target_type: schema.target_type,
        target_title: enrichment.target_title,
        comment_text: enrichment.comment_text,
        message,
        is_read: event.is_read,
        read_at: event.read_at,
        created_at: event.created_at,
        status,
    }
}
