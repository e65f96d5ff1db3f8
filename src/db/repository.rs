//! Database repository for forum operations.
//!
//! Domain rules live in `crate::forum`; this module loads aggregates, hands
//! them to those rules, and commits the resulting unit of work in one
//! transaction.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::errors::{is_unique_violation, AppError};
use crate::forum::{
    ensure_visible, is_group_visible, Change, NotificationPolicy, ThreadAggregate, ThreadEdit,
    UnitOfWork, Viewer,
};
use crate::models::{
    Group, GroupMember, GroupView, Notifications, Post, PostView, Subscription, SubscriptionEntry,
    SubscriptionKind, Subscriptions, Thread, ThreadSummary, ThreadView, Topic, TopicSummary, User,
};

/// Attempts made for a thread mutation before a conflict is surfaced.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

const THREAD_COLUMNS: &str = "id, name, topic_id, group_id, created_at, updated_at, version";
const POST_COLUMNS: &str =
    "id, thread_id, author_id, position, title, body, created_at, edited_at";
const USER_COLUMNS: &str = "id, username, email, password_hash, about_me, created_at";

const THREAD_SUMMARY_SELECT: &str = r#"
    SELECT t.id, t.name, t.group_id, t.created_at, t.updated_at,
           tp.name AS topic_name,
           (SELECT COUNT(*) FROM posts p WHERE p.thread_id = t.id) AS post_count,
           (SELECT u.username FROM posts p JOIN users u ON u.id = p.author_id
             WHERE p.thread_id = t.id AND p.position = 0) AS author
    FROM threads t
    LEFT JOIN topics tp ON tp.id = t.topic_id
"#;

/// Fields of a new thread's opening post, if it has one.
#[derive(Debug, Clone, Default)]
pub struct NewThread {
    pub title: Option<String>,
    pub body: Option<String>,
    pub topic: Option<String>,
    pub group_id: Option<String>,
}

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    policy: NotificationPolicy,
}

impl Repository {
    pub fn new(pool: SqlitePool, policy: NotificationPolicy) -> Self {
        Self { pool, policy }
    }

    // ==================== USER OPERATIONS ====================

    /// Register a user. Username and email must both be unused.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        about_me: Option<&str>,
    ) -> Result<User, AppError> {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            about_me: about_me.map(str::to_string),
            created_at: Utc::now().to_rfc3339(),
        };

        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, about_me, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.about_me)
        .bind(&user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_user_error(e, username, email))?;

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    /// Get a user by username.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE username = ?",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    /// Edit the username and/or biography of a user.
    pub async fn update_profile(
        &self,
        user_id: &str,
        username: Option<&str>,
        about_me: Option<&str>,
    ) -> Result<User, AppError> {
        let existing = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        let username = username.unwrap_or(&existing.username).to_string();
        let about_me = about_me.map(str::to_string).or(existing.about_me.clone());

        sqlx::query("UPDATE users SET username = ?, about_me = ? WHERE id = ?")
            .bind(&username)
            .bind(&about_me)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| duplicate_user_error(e, &username, &existing.email))?;

        Ok(User {
            username,
            about_me,
            ..existing
        })
    }

    /// Replace a user's stored credential.
    pub async fn update_password(&self, user_id: &str, password_hash: &str) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", user_id)));
        }
        tracing::info!(user_id, "Password credential replaced");
        Ok(())
    }

    /// Number of posts a user has written.
    pub async fn count_user_posts(&self, user_id: &str) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE author_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// A user's posts, newest first, hiding those in threads the viewer cannot see.
    pub async fn list_user_posts(
        &self,
        user_id: &str,
        viewer: &Viewer,
    ) -> Result<Vec<PostView>, AppError> {
        let rows = sqlx::query(
            r#"SELECT p.id, p.thread_id, p.author_id, p.position, p.title, p.body,
                      p.created_at, p.edited_at, u.username AS author, t.group_id AS thread_group
               FROM posts p
               JOIN users u ON u.id = p.author_id
               LEFT JOIN threads t ON t.id = p.thread_id
               WHERE p.author_id = ?
               ORDER BY p.created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter(|row| {
                let group: Option<String> = row.get("thread_group");
                is_group_visible(group.as_deref(), viewer)
            })
            .map(|row| PostView {
                post: post_from_row(row),
                author: row.get("author"),
            })
            .collect())
    }

    /// Access-check view of a user: their id plus group memberships.
    pub async fn viewer(&self, user_id: &str) -> Result<Viewer, AppError> {
        let group_ids: Vec<String> =
            sqlx::query_scalar("SELECT group_id FROM group_members WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(Viewer::new(user_id, group_ids))
    }

    // ==================== TOPIC OPERATIONS ====================

    /// Create a topic with an unused name.
    ///
    /// Fails with `DuplicateName` if the name is taken; use
    /// [`Repository::get_or_create_topic`] when either outcome is fine.
    pub async fn create_topic(&self, name: &str) -> Result<Topic, AppError> {
        let topic = Topic {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };

        sqlx::query("INSERT INTO topics (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&topic.id)
            .bind(&topic.name)
            .bind(&topic.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::DuplicateName(format!(
                        "Topic '{}' already exists; look it up instead of creating it",
                        name
                    ))
                } else {
                    e.into()
                }
            })?;

        tracing::info!(topic_id = %topic.id, name = %topic.name, "Topic created");
        Ok(topic)
    }

    /// Return the topic called `name`, creating it if needed.
    ///
    /// The insert yields to the unique constraint, so concurrent callers
    /// converge on the same row.
    pub async fn get_or_create_topic(&self, name: &str) -> Result<Topic, AppError> {
        let mut conn = self.pool.acquire().await?;
        upsert_topic(&mut conn, name).await
    }

    /// Get a topic by its unique name.
    pub async fn get_topic_by_name(&self, name: &str) -> Result<Option<Topic>, AppError> {
        let row = sqlx::query("SELECT id, name, created_at FROM topics WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(topic_from_row))
    }

    async fn require_topic(&self, name: &str) -> Result<Topic, AppError> {
        self.get_topic_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Topic '{}' not found", name)))
    }

    /// List all topics with public thread and subscriber counts.
    pub async fn list_topics(&self) -> Result<Vec<TopicSummary>, AppError> {
        let rows = sqlx::query(
            r#"SELECT tp.id, tp.name, tp.created_at,
                      (SELECT COUNT(*) FROM threads t
                        WHERE t.topic_id = tp.id AND t.group_id IS NULL) AS thread_count,
                      (SELECT COUNT(*) FROM topic_subscriptions s
                        WHERE s.topic_id = tp.id) AS subscriber_count
               FROM topics tp ORDER BY tp.name"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TopicSummary {
                topic: topic_from_row(row),
                thread_count: row.get("thread_count"),
                subscriber_count: row.get("subscriber_count"),
            })
            .collect())
    }

    /// Threads tagged with the named topic that `viewer` may see.
    pub async fn list_topic_threads(
        &self,
        name: &str,
        viewer: &Viewer,
    ) -> Result<Vec<ThreadSummary>, AppError> {
        let topic = self.require_topic(name).await?;
        let rows = sqlx::query(&format!(
            "{} WHERE t.topic_id = ? ORDER BY t.updated_at DESC",
            THREAD_SUMMARY_SELECT
        ))
        .bind(&topic.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(thread_summary_from_row)
            .filter(|t| is_group_visible(t.group_id.as_deref(), viewer))
            .collect())
    }

    /// Subscribe `user_id` to the named topic. Returns false if already subscribed.
    pub async fn subscribe_topic(&self, name: &str, user_id: &str) -> Result<bool, AppError> {
        let topic = self.require_topic(name).await?;
        let mut uow = UnitOfWork::new();
        uow.push(Change::InsertSubscription(Subscription::new(
            SubscriptionKind::Topic,
            &topic.id,
            user_id,
        )));
        let changed = self.commit(&uow).await? > 0;
        tracing::debug!(topic = %topic.name, user_id, changed, "Topic subscribe");
        Ok(changed)
    }

    /// Remove the topic subscription. Returns false if there was none.
    pub async fn unsubscribe_topic(&self, name: &str, user_id: &str) -> Result<bool, AppError> {
        let topic = self.require_topic(name).await?;
        let mut uow = UnitOfWork::new();
        uow.push(Change::DeleteSubscription {
            kind: SubscriptionKind::Topic,
            target_id: topic.id.clone(),
            user_id: user_id.to_string(),
        });
        let changed = self.commit(&uow).await? > 0;
        tracing::debug!(topic = %topic.name, user_id, changed, "Topic unsubscribe");
        Ok(changed)
    }

    /// Clear the unseen flag on the user's topic subscription.
    pub async fn mark_topic_seen(&self, name: &str, user_id: &str) -> Result<bool, AppError> {
        let topic = self.require_topic(name).await?;
        let mut uow = UnitOfWork::new();
        uow.push(Change::SetUnseen {
            kind: SubscriptionKind::Topic,
            target_id: topic.id.clone(),
            user_id: user_id.to_string(),
            unseen: false,
        });
        Ok(self.commit(&uow).await? > 0)
    }

    // ==================== THREAD OPERATIONS ====================

    /// Create a thread, empty or opened with its first post.
    ///
    /// A topic name is resolved with get-or-create inside the same
    /// transaction, so a rejected thread leaves no topic behind. A group
    /// thread may only be started by a member of that group.
    pub async fn create_thread(
        &self,
        author: &Viewer,
        request: NewThread,
    ) -> Result<ThreadView, AppError> {
        if let Some(group_id) = &request.group_id {
            if !author.is_member(group_id) {
                return Err(AppError::NotFound(format!("Group {} not found", group_id)));
            }
        }

        let mut tx = self.begin_write().await?;
        let topic_id = match &request.topic {
            Some(name) => Some(upsert_topic(&mut tx, name).await?.id),
            None => None,
        };

        let mut uow = UnitOfWork::new();
        let mut aggregate =
            ThreadAggregate::create(Thread::new(topic_id, request.group_id.clone()), &mut uow);

        if request.title.is_some() || request.body.is_some() {
            let post = Post::new(
                &author.user_id,
                request.title,
                request.body.as_deref().unwrap_or_default(),
            );
            aggregate.add_first_post(post, &self.policy, &mut uow)?;
        }

        apply(&mut tx, &uow).await?;
        let view = render_thread(&mut tx, &aggregate).await?;
        tx.commit().await?;

        tracing::info!(
            thread_id = %aggregate.thread.id,
            author_id = %author.user_id,
            group_id = ?aggregate.thread.group_id,
            "Thread created"
        );
        Ok(view)
    }

    /// Full thread view, if `viewer` may see it.
    pub async fn get_thread(&self, id: &str, viewer: &Viewer) -> Result<ThreadView, AppError> {
        let mut conn = self.pool.acquire().await?;
        let aggregate = load_aggregate(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Thread {} not found", id)))?;
        ensure_visible(&aggregate.thread, viewer)?;
        render_thread(&mut conn, &aggregate).await
    }

    /// Public threads (no group), most recently active first.
    pub async fn list_public_threads(&self) -> Result<Vec<ThreadSummary>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE t.group_id IS NULL ORDER BY t.updated_at DESC",
            THREAD_SUMMARY_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(thread_summary_from_row).collect())
    }

    /// Post into a thread. Replies flag subscribers; an empty thread is opened instead.
    pub async fn add_post(
        &self,
        thread_id: &str,
        viewer: &Viewer,
        title: Option<String>,
        body: &str,
    ) -> Result<Post, AppError> {
        let policy = self.policy;
        let post = self
            .mutate_thread(thread_id, viewer, |aggregate, uow| {
                let post = Post::new(&viewer.user_id, title.clone(), body);
                aggregate.add_post(post, &policy, uow)?;
                aggregate
                    .posts
                    .last()
                    .cloned()
                    .ok_or_else(|| AppError::Internal("Appended post missing".to_string()))
            })
            .await?;

        tracing::info!(
            thread_id,
            post_id = %post.id,
            author_id = %viewer.user_id,
            position = ?post.position,
            "Post added"
        );
        Ok(post)
    }

    /// Edit a thread's title, topic, or opening text.
    pub async fn update_thread(
        &self,
        thread_id: &str,
        viewer: &Viewer,
        title: Option<String>,
        topic: Option<String>,
        body: Option<String>,
        expected_version: Option<i64>,
    ) -> Result<ThreadView, AppError> {
        let topic = topic.map(|name| name.trim().to_string());

        self.mutate_thread_in_topic(thread_id, viewer, topic.as_deref(), |aggregate, topic_id, uow| {
            if let Some(expected) = expected_version {
                if aggregate.thread.version != expected {
                    return Err(AppError::Conflict {
                        message: format!(
                            "Version mismatch: expected {}, current {}",
                            expected, aggregate.thread.version
                        ),
                        current_version: Some(aggregate.thread.version),
                    });
                }
            }
            let edit = ThreadEdit {
                title: title.clone(),
                topic_id,
                body: body.clone(),
            };
            aggregate.edit(&viewer.user_id, edit, uow)
        })
        .await?;

        tracing::info!(thread_id, editor_id = %viewer.user_id, "Thread edited");
        self.get_thread(thread_id, viewer).await
    }

    /// Subscribe the viewer to a thread. Returns false if already subscribed.
    pub async fn subscribe_thread(&self, thread_id: &str, viewer: &Viewer) -> Result<bool, AppError> {
        self.mutate_thread(thread_id, viewer, |aggregate, uow| {
            Ok(aggregate.subscribe(&viewer.user_id, uow))
        })
        .await
    }

    /// Unsubscribe the viewer from a thread. Returns false if not subscribed.
    pub async fn unsubscribe_thread(
        &self,
        thread_id: &str,
        viewer: &Viewer,
    ) -> Result<bool, AppError> {
        self.mutate_thread(thread_id, viewer, |aggregate, uow| {
            Ok(aggregate.unsubscribe(&viewer.user_id, uow))
        })
        .await
    }

    /// Clear the viewer's unseen flag on a thread.
    pub async fn mark_thread_seen(&self, thread_id: &str, viewer: &Viewer) -> Result<bool, AppError> {
        self.mutate_thread(thread_id, viewer, |aggregate, uow| {
            Ok(aggregate.mark_seen(&viewer.user_id, uow))
        })
        .await
    }

    /// Load, check visibility, run `op`, commit; reload and rerun on a write conflict.
    async fn mutate_thread<T, F>(
        &self,
        thread_id: &str,
        viewer: &Viewer,
        mut op: F,
    ) -> Result<T, AppError>
    where
        F: FnMut(&mut ThreadAggregate, &mut UnitOfWork) -> Result<T, AppError> + Send,
        T: Send,
    {
        self.mutate_thread_in_topic(thread_id, viewer, None, |aggregate, _, uow| {
            op(aggregate, uow)
        })
        .await
    }

    /// Like `mutate_thread`, resolving `topic_name` in the same transaction.
    ///
    /// `op` receives the topic change: `None` leaves the topic alone, an
    /// empty name clears it, any other name is get-or-created.
    async fn mutate_thread_in_topic<T, F>(
        &self,
        thread_id: &str,
        viewer: &Viewer,
        topic_name: Option<&str>,
        mut op: F,
    ) -> Result<T, AppError>
    where
        F: FnMut(&mut ThreadAggregate, Option<Option<String>>, &mut UnitOfWork) -> Result<T, AppError>
            + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut tx = self.begin_write().await?;
            let mut aggregate = load_aggregate(&mut tx, thread_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Thread {} not found", thread_id)))?;
            ensure_visible(&aggregate.thread, viewer)?;

            let topic_id = match topic_name {
                Some("") => Some(None),
                Some(name) => Some(Some(upsert_topic(&mut tx, name).await?.id)),
                None => None,
            };

            let mut uow = UnitOfWork::new();
            let output = op(&mut aggregate, topic_id, &mut uow)?;

            let written = match apply(&mut tx, &uow).await {
                Ok(_) => tx.commit().await.map_err(write_error),
                Err(e) => {
                    drop(tx);
                    Err(e)
                }
            };

            match written {
                Ok(()) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::warn!(thread_id, attempt, "Thread write conflict, retrying: {}", e);
                }
                Err(AppError::Conflict {
                    message,
                    current_version: None,
                }) => {
                    let current_version = self.thread_version(thread_id).await?;
                    tracing::warn!(thread_id, attempt, ?current_version, "Thread write conflict, giving up");
                    return Err(AppError::Conflict {
                        message,
                        current_version,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn thread_version(&self, thread_id: &str) -> Result<Option<i64>, AppError> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT version FROM threads WHERE id = ?")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    // ==================== POST OPERATIONS ====================

    /// Get a post, if the viewer may see the thread it belongs to.
    pub async fn get_post(&self, id: &str, viewer: &Viewer) -> Result<PostView, AppError> {
        let row = sqlx::query(
            r#"SELECT p.id, p.thread_id, p.author_id, p.position, p.title, p.body,
                      p.created_at, p.edited_at, u.username AS author, t.group_id AS thread_group
               FROM posts p
               JOIN users u ON u.id = p.author_id
               LEFT JOIN threads t ON t.id = p.thread_id
               WHERE p.id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let not_found = || AppError::NotFound(format!("Post {} not found", id));
        let row = row.ok_or_else(not_found)?;
        let group: Option<String> = row.get("thread_group");
        if !is_group_visible(group.as_deref(), viewer) {
            return Err(not_found());
        }

        Ok(PostView {
            post: post_from_row(&row),
            author: row.get("author"),
        })
    }

    /// Replace a post's text. Only its author may do this.
    pub async fn update_post(
        &self,
        id: &str,
        viewer: &Viewer,
        body: &str,
    ) -> Result<Post, AppError> {
        let thread_id =
            sqlx::query_scalar::<_, Option<String>>("SELECT thread_id FROM posts WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .flatten();
        let thread_id = thread_id.ok_or_else(|| AppError::NotFound(format!("Post {} not found", id)))?;

        let post = self
            .mutate_thread(&thread_id, viewer, |aggregate, uow| {
                aggregate.edit_post(&viewer.user_id, id, body.to_string(), uow)
            })
            .await?;

        tracing::info!(post_id = id, editor_id = %viewer.user_id, "Post edited");
        Ok(post)
    }

    // ==================== SUBSCRIPTION OPERATIONS ====================

    /// True if any of the user's thread or topic links is unseen.
    pub async fn has_unseen(&self, user_id: &str) -> Result<bool, AppError> {
        let unseen: i64 = sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM thread_subscriptions WHERE user_id = ? AND unseen = 1)
                   OR EXISTS(SELECT 1 FROM topic_subscriptions WHERE user_id = ? AND unseen = 1)"#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(unseen != 0)
    }

    /// Unseen threads and topics for the alerts view.
    pub async fn notifications(&self, user_id: &str) -> Result<Notifications, AppError> {
        let threads = self
            .subscription_entries(SubscriptionKind::Thread, user_id, true)
            .await?;
        let topics = self
            .subscription_entries(SubscriptionKind::Topic, user_id, true)
            .await?;
        Ok(Notifications {
            has_unseen: self.has_unseen(user_id).await?,
            threads,
            topics,
        })
    }

    /// Every thread and topic the user follows.
    pub async fn subscriptions(&self, user_id: &str) -> Result<Subscriptions, AppError> {
        Ok(Subscriptions {
            threads: self
                .subscription_entries(SubscriptionKind::Thread, user_id, false)
                .await?,
            topics: self
                .subscription_entries(SubscriptionKind::Topic, user_id, false)
                .await?,
        })
    }

    async fn subscription_entries(
        &self,
        kind: SubscriptionKind,
        user_id: &str,
        unseen_only: bool,
    ) -> Result<Vec<SubscriptionEntry>, AppError> {
        let filter = if unseen_only { " AND s.unseen = 1" } else { "" };
        let sql = match kind {
            SubscriptionKind::Thread => format!(
                r#"SELECT s.thread_id AS target_id, t.name AS name, s.unseen
                   FROM thread_subscriptions s JOIN threads t ON t.id = s.thread_id
                   WHERE s.user_id = ?{} ORDER BY t.updated_at DESC"#,
                filter
            ),
            SubscriptionKind::Topic => format!(
                r#"SELECT s.topic_id AS target_id, tp.name AS name, s.unseen
                   FROM topic_subscriptions s JOIN topics tp ON tp.id = s.topic_id
                   WHERE s.user_id = ?{} ORDER BY tp.name"#,
                filter
            ),
        };

        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let unseen: i64 = row.get("unseen");
                SubscriptionEntry {
                    kind,
                    target_id: row.get("target_id"),
                    name: row.get("name"),
                    unseen: unseen != 0,
                }
            })
            .collect())
    }

    // ==================== GROUP OPERATIONS ====================

    /// Create a group; its creator becomes the first member.
    pub async fn create_group(
        &self,
        creator_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Group, AppError> {
        let group = Group {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            created_by: creator_id.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };

        let mut tx = self.begin_write().await?;
        sqlx::query(
            "INSERT INTO forum_groups (id, name, description, created_by, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.created_by)
        .bind(&group.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?)")
            .bind(&group.id)
            .bind(creator_id)
            .bind(&group.created_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(group_id = %group.id, creator_id, "Group created");
        Ok(group)
    }

    /// Groups the user belongs to.
    pub async fn list_groups_for(&self, user_id: &str) -> Result<Vec<Group>, AppError> {
        let rows = sqlx::query(
            r#"SELECT g.id, g.name, g.description, g.created_by, g.created_at
               FROM forum_groups g JOIN group_members m ON m.group_id = g.id
               WHERE m.user_id = ? ORDER BY g.name"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(group_from_row).collect())
    }

    /// Group page with members and threads. Non-members get `NotFound`.
    pub async fn get_group(&self, id: &str, viewer: &Viewer) -> Result<GroupView, AppError> {
        let not_found = || AppError::NotFound(format!("Group {} not found", id));
        if !viewer.is_member(id) {
            return Err(not_found());
        }

        let row = sqlx::query(
            "SELECT id, name, description, created_by, created_at FROM forum_groups WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(not_found)?;

        let members = self.group_members(id).await?;

        let threads = sqlx::query(&format!(
            "{} WHERE t.group_id = ? ORDER BY t.updated_at DESC",
            THREAD_SUMMARY_SELECT
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(thread_summary_from_row)
        .collect();

        Ok(GroupView {
            group: group_from_row(&row),
            members,
            threads,
        })
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<GroupMember>, AppError> {
        let rows = sqlx::query(
            r#"SELECT m.user_id, u.username, m.joined_at
               FROM group_members m JOIN users u ON u.id = m.user_id
               WHERE m.group_id = ? ORDER BY m.joined_at, u.username"#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| GroupMember {
                user_id: row.get("user_id"),
                username: row.get("username"),
                joined_at: row.get("joined_at"),
            })
            .collect())
    }

    /// Add the user called `username` to a group the viewer belongs to.
    pub async fn add_group_member(
        &self,
        group_id: &str,
        viewer: &Viewer,
        username: &str,
    ) -> Result<GroupMember, AppError> {
        if !viewer.is_member(group_id) {
            return Err(AppError::NotFound(format!("Group {} not found", group_id)));
        }
        let user = self
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User '{}' not found", username)))?;

        let joined_at = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?) ON CONFLICT(group_id, user_id) DO NOTHING",
        )
        .bind(group_id)
        .bind(&user.id)
        .bind(&joined_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            tracing::info!(group_id, user_id = %user.id, added_by = %viewer.user_id, "Group member added");
        }

        self.group_members(group_id)
            .await?
            .into_iter()
            .find(|m| m.user_id == user.id)
            .ok_or_else(|| AppError::Internal("Group member missing after insert".to_string()))
    }

    /// Leave a group. Thread subscriptions inside it are dropped with the membership.
    pub async fn leave_group(&self, group_id: &str, user_id: &str) -> Result<bool, AppError> {
        let mut tx = self.begin_write().await?;
        let result = sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"DELETE FROM thread_subscriptions
               WHERE user_id = ? AND thread_id IN (SELECT id FROM threads WHERE group_id = ?)"#,
        )
        .bind(user_id)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(group_id, user_id, "Left group");
        Ok(true)
    }

    /// Commit a unit of work on its own; returns rows affected.
    async fn commit(&self, uow: &UnitOfWork) -> Result<u64, AppError> {
        let mut tx = self.begin_write().await?;
        let affected = apply(&mut tx, uow).await?;
        tx.commit().await.map_err(write_error)?;
        Ok(affected)
    }

    /// Open a transaction holding the write lock from its first statement.
    ///
    /// A deferred transaction that reads and then writes cannot wait out a
    /// concurrent writer under WAL; it fails with SQLITE_BUSY_SNAPSHOT.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, AppError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }
}

// ==================== UNIT OF WORK ====================

/// Apply every change in order; the caller owns the transaction.
async fn apply(conn: &mut SqliteConnection, uow: &UnitOfWork) -> Result<u64, AppError> {
    let mut affected = 0;
    for change in uow.changes() {
        affected += apply_change(conn, change).await?;
    }
    Ok(affected)
}

async fn apply_change(conn: &mut SqliteConnection, change: &Change) -> Result<u64, AppError> {
    let result = match change {
        Change::InsertThread(thread) => {
            sqlx::query(&format!(
                "INSERT INTO threads ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
                THREAD_COLUMNS
            ))
            .bind(&thread.id)
            .bind(&thread.name)
            .bind(&thread.topic_id)
            .bind(&thread.group_id)
            .bind(&thread.created_at)
            .bind(&thread.updated_at)
            .bind(thread.version)
            .execute(&mut *conn)
            .await
        }
        Change::BumpThreadVersion {
            thread_id,
            expected,
            updated_at,
        } => {
            let result = sqlx::query(
                "UPDATE threads SET version = version + 1, updated_at = ? WHERE id = ? AND version = ?",
            )
            .bind(updated_at)
            .bind(thread_id)
            .bind(expected)
            .execute(&mut *conn)
            .await
            .map_err(write_error)?;

            if result.rows_affected() == 0 {
                let current: Option<i64> =
                    sqlx::query_scalar("SELECT version FROM threads WHERE id = ?")
                        .bind(thread_id)
                        .fetch_optional(&mut *conn)
                        .await?;
                return Err(match current {
                    Some(current_version) => AppError::Conflict {
                        message: format!(
                            "Concurrent modification detected on thread {}",
                            thread_id
                        ),
                        current_version: Some(current_version),
                    },
                    None => AppError::NotFound(format!("Thread {} not found", thread_id)),
                });
            }
            Ok(result)
        }
        Change::SetThreadName { thread_id, name } => {
            sqlx::query("UPDATE threads SET name = ? WHERE id = ?")
                .bind(name)
                .bind(thread_id)
                .execute(&mut *conn)
                .await
        }
        Change::SetThreadTopic {
            thread_id,
            topic_id,
        } => {
            sqlx::query("UPDATE threads SET topic_id = ? WHERE id = ?")
                .bind(topic_id)
                .bind(thread_id)
                .execute(&mut *conn)
                .await
        }
        Change::InsertPost(post) => {
            sqlx::query(&format!(
                "INSERT INTO posts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                POST_COLUMNS
            ))
            .bind(&post.id)
            .bind(&post.thread_id)
            .bind(&post.author_id)
            .bind(post.position)
            .bind(&post.title)
            .bind(&post.body)
            .bind(&post.created_at)
            .bind(&post.edited_at)
            .execute(&mut *conn)
            .await
        }
        Change::UpdatePost {
            post_id,
            title,
            body,
            edited_at,
        } => {
            sqlx::query("UPDATE posts SET title = ?, body = ?, edited_at = ? WHERE id = ?")
                .bind(title)
                .bind(body)
                .bind(edited_at)
                .bind(post_id)
                .execute(&mut *conn)
                .await
        }
        Change::InsertSubscription(link) => {
            let (table, column) = subscription_table(link.kind);
            sqlx::query(&format!(
                "INSERT INTO {table} ({column}, user_id, unseen, created_at) VALUES (?, ?, ?, ?) ON CONFLICT({column}, user_id) DO NOTHING"
            ))
            .bind(&link.target_id)
            .bind(&link.user_id)
            .bind(link.unseen as i32)
            .bind(&link.created_at)
            .execute(&mut *conn)
            .await
        }
        Change::DeleteSubscription {
            kind,
            target_id,
            user_id,
        } => {
            let (table, column) = subscription_table(*kind);
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE {column} = ? AND user_id = ?"
            ))
            .bind(target_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await
        }
        Change::SetUnseen {
            kind,
            target_id,
            user_id,
            unseen,
        } => {
            let (table, column) = subscription_table(*kind);
            sqlx::query(&format!(
                "UPDATE {table} SET unseen = ? WHERE {column} = ? AND user_id = ? AND unseen != ?"
            ))
            .bind(*unseen as i32)
            .bind(target_id)
            .bind(user_id)
            .bind(*unseen as i32)
            .execute(&mut *conn)
            .await
        }
        Change::MarkAllUnseen {
            kind,
            target_id,
            except_user,
            members_of,
        } => {
            let (table, column) = subscription_table(*kind);
            let result = sqlx::query(&format!(
                r#"UPDATE {table} SET unseen = 1
                   WHERE {column} = ? AND unseen = 0
                     AND (? IS NULL OR user_id != ?)
                     AND (? IS NULL OR user_id IN (SELECT user_id FROM group_members WHERE group_id = ?))"#
            ))
            .bind(target_id)
            .bind(except_user)
            .bind(except_user)
            .bind(members_of)
            .bind(members_of)
            .execute(&mut *conn)
            .await
            .map_err(write_error)?;
            tracing::debug!(
                kind = kind.as_str(),
                target_id = %target_id,
                members_of = ?members_of,
                flagged = result.rows_affected(),
                "Subscribers flagged unseen"
            );
            Ok(result)
        }
    };

    result.map(|r| r.rows_affected()).map_err(write_error)
}

fn subscription_table(kind: SubscriptionKind) -> (&'static str, &'static str) {
    match kind {
        SubscriptionKind::Thread => ("thread_subscriptions", "thread_id"),
        SubscriptionKind::Topic => ("topic_subscriptions", "topic_id"),
    }
}

/// Store errors during a write: lost races become retryable conflicts.
fn write_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        let busy = matches!(db_err.code().as_deref(), Some("5") | Some("517"));
        if db_err.is_unique_violation() || busy {
            tracing::debug!("Write lost a race: {}", db_err);
            return AppError::Conflict {
                message: "Concurrent modification detected".to_string(),
                current_version: None,
            };
        }
    }
    AppError::from(err)
}

/// Insert the topic unless it exists and return the stored row.
async fn upsert_topic(conn: &mut SqliteConnection, name: &str) -> Result<Topic, AppError> {
    let result = sqlx::query(
        "INSERT INTO topics (id, name, created_at) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(name)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(write_error)?;

    if result.rows_affected() == 1 {
        tracing::info!(name, "Topic created on first use");
    }

    let row = sqlx::query("SELECT id, name, created_at FROM topics WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Topic '{}' vanished after upsert", name)))?;
    Ok(topic_from_row(&row))
}

fn duplicate_user_error(err: sqlx::Error, username: &str, email: &str) -> AppError {
    if !is_unique_violation(&err) {
        return err.into();
    }
    let on_email = err
        .as_database_error()
        .map(|e| e.message().contains("users.email"))
        .unwrap_or(false);
    if on_email {
        AppError::DuplicateName(format!("Email '{}' is already registered", email))
    } else {
        AppError::DuplicateName(format!("Username '{}' is already taken", username))
    }
}

async fn load_aggregate(
    conn: &mut SqliteConnection,
    thread_id: &str,
) -> Result<Option<ThreadAggregate>, AppError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM threads WHERE id = ?",
        THREAD_COLUMNS
    ))
    .bind(thread_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let posts = sqlx::query(&format!(
        "SELECT {} FROM posts WHERE thread_id = ? ORDER BY position",
        POST_COLUMNS
    ))
    .bind(thread_id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(post_from_row)
    .collect();

    let links = sqlx::query(
        "SELECT thread_id AS target_id, user_id, unseen, created_at FROM thread_subscriptions WHERE thread_id = ? ORDER BY created_at",
    )
    .bind(thread_id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|r| subscription_from_row(r, SubscriptionKind::Thread))
    .collect();

    Ok(Some(ThreadAggregate::load(thread_from_row(&row), posts, links)))
}

/// Resolve author names and the topic name for a loaded thread.
async fn render_thread(
    conn: &mut SqliteConnection,
    aggregate: &ThreadAggregate,
) -> Result<ThreadView, AppError> {
    let authors: HashMap<String, String> = sqlx::query(
        r#"SELECT id, username FROM users
           WHERE id IN (SELECT author_id FROM posts WHERE thread_id = ?)"#,
    )
    .bind(aggregate.id())
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|r| (r.get("id"), r.get("username")))
    .collect();

    let topic = match &aggregate.thread.topic_id {
        Some(topic_id) => {
            sqlx::query_scalar::<_, String>("SELECT name FROM topics WHERE id = ?")
                .bind(topic_id)
                .fetch_optional(&mut *conn)
                .await?
        }
        None => None,
    };

    let posts = aggregate
        .posts
        .iter()
        .map(|post| PostView {
            author: authors.get(&post.author_id).cloned().unwrap_or_default(),
            post: post.clone(),
        })
        .collect();

    Ok(ThreadView {
        thread: aggregate.thread.clone(),
        topic,
        posts,
        subscribers: aggregate.subscribers.user_ids(),
    })
}

// Helper functions for row conversion

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        about_me: row.get("about_me"),
        created_at: row.get("created_at"),
    }
}

fn topic_from_row(row: &SqliteRow) -> Topic {
    Topic {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }
}

fn thread_from_row(row: &SqliteRow) -> Thread {
    Thread {
        id: row.get("id"),
        name: row.get("name"),
        topic_id: row.get("topic_id"),
        group_id: row.get("group_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn thread_summary_from_row(row: &SqliteRow) -> ThreadSummary {
    ThreadSummary {
        id: row.get("id"),
        name: row.get("name"),
        topic: row.get("topic_name"),
        group_id: row.get("group_id"),
        author: row.get("author"),
        post_count: row.get("post_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn post_from_row(row: &SqliteRow) -> Post {
    Post {
        id: row.get("id"),
        author_id: row.get("author_id"),
        thread_id: row.get("thread_id"),
        position: row.get("position"),
        title: row.get("title"),
        body: row.get("body"),
        created_at: row.get("created_at"),
        edited_at: row.get("edited_at"),
    }
}

fn group_from_row(row: &SqliteRow) -> Group {
    Group {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    }
}

fn subscription_from_row(row: &SqliteRow, kind: SubscriptionKind) -> Subscription {
    let unseen: i64 = row.get("unseen");
    Subscription {
        kind,
        target_id: row.get("target_id"),
        user_id: row.get("user_id"),
        unseen: unseen != 0,
        created_at: row.get("created_at"),
    }
}
