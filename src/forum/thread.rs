use crate::errors::AppError;
use crate::models::{Post, Subscription, SubscriptionKind, Thread};

use super::{Change, NotificationPolicy, SubscriptionSet, UnitOfWork};

/// Where a thread is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// No posts and no name
    Empty,
    /// Opening post only
    Open,
    /// Opening post plus replies
    Active,
}

/// Edits the opening author may make to a thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadEdit {
    pub title: Option<String>,
    /// `Some(None)` clears the topic
    pub topic_id: Option<Option<String>>,
    pub body: Option<String>,
}

/// A thread together with its ordered posts and subscriber links.
#[derive(Debug, Clone)]
pub struct ThreadAggregate {
    pub thread: Thread,
    pub posts: Vec<Post>,
    pub subscribers: SubscriptionSet,
}

impl ThreadAggregate {
    /// Start a new, empty thread.
    pub fn create(thread: Thread, uow: &mut UnitOfWork) -> Self {
        uow.push(Change::InsertThread(thread.clone()));
        let subscribers = SubscriptionSet::new(SubscriptionKind::Thread, &thread.id);
        Self {
            thread,
            posts: Vec::new(),
            subscribers,
        }
    }

    /// Rebuild from stored rows. `posts` must already be in position order.
    pub fn load(thread: Thread, posts: Vec<Post>, links: Vec<Subscription>) -> Self {
        let subscribers = SubscriptionSet::from_links(SubscriptionKind::Thread, &thread.id, links);
        Self {
            thread,
            posts,
            subscribers,
        }
    }

    pub fn id(&self) -> &str {
        &self.thread.id
    }

    pub fn state(&self) -> ThreadState {
        match self.posts.len() {
            0 => ThreadState::Empty,
            1 => ThreadState::Open,
            _ => ThreadState::Active,
        }
    }

    pub fn is_subscribed(&self, user_id: &str) -> bool {
        self.subscribers.contains(user_id)
    }

    /// Open an empty thread with `post`, which must carry a title.
    ///
    /// The thread takes the title as its name and the author becomes the only subscriber.
    pub fn add_first_post(
        &mut self,
        mut post: Post,
        policy: &NotificationPolicy,
        uow: &mut UnitOfWork,
    ) -> Result<(), AppError> {
        if self.state() != ThreadState::Empty {
            return Err(AppError::Validation(format!(
                "Thread {} already has an opening post",
                self.thread.id
            )));
        }
        let title = post
            .usable_title()
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::InvalidFirstPost(
                    "A thread cannot be opened with a post that has no title".to_string(),
                )
            })?;

        self.bump_version(uow);

        post.thread_id = Some(self.thread.id.clone());
        post.position = Some(0);
        post.title = Some(title.clone());
        self.thread.name = Some(title.clone());
        uow.push(Change::SetThreadName {
            thread_id: self.thread.id.clone(),
            name: title,
        });

        for user_id in self.subscribers.reset_to(&post.author_id) {
            uow.push(Change::DeleteSubscription {
                kind: SubscriptionKind::Thread,
                target_id: self.thread.id.clone(),
                user_id,
            });
        }
        if let Some(link) = self.subscribers.get(&post.author_id) {
            uow.push(Change::InsertSubscription(link.clone()));
        }

        self.fan_out_topic(&post.author_id, policy, uow);

        uow.push(Change::InsertPost(post.clone()));
        self.posts.push(post);
        Ok(())
    }

    /// Append `post` as a reply, flag existing subscribers, and subscribe the author.
    ///
    /// On an empty thread this opens it instead.
    pub fn add_post(
        &mut self,
        mut post: Post,
        policy: &NotificationPolicy,
        uow: &mut UnitOfWork,
    ) -> Result<(), AppError> {
        if self.state() == ThreadState::Empty {
            return self.add_first_post(post, policy, uow);
        }

        self.bump_version(uow);

        post.thread_id = Some(self.thread.id.clone());
        post.position = Some(self.posts.len() as i64);
        uow.push(Change::InsertPost(post.clone()));

        self.notify(policy.exempt(&post.author_id), uow);
        self.subscribe(&post.author_id, uow);
        self.fan_out_topic(&post.author_id, policy, uow);

        self.posts.push(post);
        Ok(())
    }

    /// Raise the unseen flag on every subscriber link except `except`.
    pub fn notify(&mut self, except: Option<&str>, uow: &mut UnitOfWork) -> usize {
        let flagged = self.subscribers.mark_all_unseen(except);
        uow.push(Change::MarkAllUnseen {
            kind: SubscriptionKind::Thread,
            target_id: self.thread.id.clone(),
            except_user: except.map(str::to_string),
            members_of: None,
        });
        flagged
    }

    /// Returns false if `user_id` was already subscribed.
    pub fn subscribe(&mut self, user_id: &str, uow: &mut UnitOfWork) -> bool {
        match self.subscribers.insert(user_id) {
            Some(link) => {
                uow.push(Change::InsertSubscription(link.clone()));
                true
            }
            None => false,
        }
    }

    /// Returns false if `user_id` was not subscribed.
    pub fn unsubscribe(&mut self, user_id: &str, uow: &mut UnitOfWork) -> bool {
        if !self.subscribers.remove(user_id) {
            return false;
        }
        uow.push(Change::DeleteSubscription {
            kind: SubscriptionKind::Thread,
            target_id: self.thread.id.clone(),
            user_id: user_id.to_string(),
        });
        true
    }

    /// Read acknowledgement: clear `user_id`'s unseen flag.
    pub fn mark_seen(&mut self, user_id: &str, uow: &mut UnitOfWork) -> bool {
        if !self.subscribers.set_unseen(user_id, false) {
            return false;
        }
        uow.push(Change::SetUnseen {
            kind: SubscriptionKind::Thread,
            target_id: self.thread.id.clone(),
            user_id: user_id.to_string(),
            unseen: false,
        });
        true
    }

    /// Apply an edit by `editor_id`, who must have written the opening post.
    pub fn edit(
        &mut self,
        editor_id: &str,
        edit: ThreadEdit,
        uow: &mut UnitOfWork,
    ) -> Result<(), AppError> {
        let opening = self.posts.first().ok_or_else(|| {
            AppError::Validation(format!("Thread {} has no opening post", self.thread.id))
        })?;
        if opening.author_id != editor_id {
            return Err(AppError::Forbidden(
                "Only the author of the opening post can edit this thread".to_string(),
            ));
        }
        if let Some(title) = &edit.title {
            if title.trim().is_empty() {
                return Err(AppError::InvalidFirstPost(
                    "A thread's opening post must keep a title".to_string(),
                ));
            }
        }

        self.bump_version(uow);
        let now = chrono::Utc::now().to_rfc3339();

        if let Some(topic_id) = edit.topic_id {
            self.thread.topic_id = topic_id.clone();
            uow.push(Change::SetThreadTopic {
                thread_id: self.thread.id.clone(),
                topic_id,
            });
        }

        if let Some(title) = &edit.title {
            let title = title.trim().to_string();
            self.thread.name = Some(title.clone());
            uow.push(Change::SetThreadName {
                thread_id: self.thread.id.clone(),
                name: title,
            });
        }

        if edit.title.is_some() || edit.body.is_some() {
            let opening = &mut self.posts[0];
            if let Some(name) = &self.thread.name {
                opening.title = Some(name.clone());
            }
            if let Some(body) = edit.body {
                opening.body = body;
            }
            opening.edited_at = Some(now.clone());
            uow.push(Change::UpdatePost {
                post_id: opening.id.clone(),
                title: opening.title.clone(),
                body: opening.body.clone(),
                edited_at: now,
            });
        }
        Ok(())
    }

    /// Replace the text of one of this thread's posts. Only its author may do so.
    pub fn edit_post(
        &mut self,
        editor_id: &str,
        post_id: &str,
        body: String,
        uow: &mut UnitOfWork,
    ) -> Result<Post, AppError> {
        let index = self
            .posts
            .iter()
            .position(|p| p.id == post_id)
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))?;
        if self.posts[index].author_id != editor_id {
            return Err(AppError::Forbidden(
                "Only the author can edit this post".to_string(),
            ));
        }

        self.bump_version(uow);
        let now = chrono::Utc::now().to_rfc3339();
        let post = &mut self.posts[index];
        post.body = body;
        post.edited_at = Some(now.clone());
        uow.push(Change::UpdatePost {
            post_id: post.id.clone(),
            title: post.title.clone(),
            body: post.body.clone(),
            edited_at: now,
        });
        Ok(post.clone())
    }

    /// Topic subscribers outside a group thread's group never hear of it.
    fn fan_out_topic(&self, author_id: &str, policy: &NotificationPolicy, uow: &mut UnitOfWork) {
        if !policy.topic_fanout {
            return;
        }
        if let Some(topic_id) = &self.thread.topic_id {
            uow.push(Change::MarkAllUnseen {
                kind: SubscriptionKind::Topic,
                target_id: topic_id.clone(),
                except_user: policy.exempt(author_id).map(str::to_string),
                members_of: self.thread.group_id.clone(),
            });
        }
    }

    fn bump_version(&mut self, uow: &mut UnitOfWork) {
        let now = chrono::Utc::now().to_rfc3339();
        uow.push(Change::BumpThreadVersion {
            thread_id: self.thread.id.clone(),
            expected: self.thread.version,
            updated_at: now.clone(),
        });
        self.thread.version += 1;
        self.thread.updated_at = now;
    }
}
