//! Post visibility.
//!
//! `can_view` is the single decision function for every read path over
//! posts and their comments. It is pure: the viewer's follow edges, private
//! grants and group memberships are loaded once into a `ViewerContext` and
//! the predicate is applied per post.

use std::collections::HashSet;

use circle_db::Connection;
use circle_db::queries::{follows, groups, posts};
use circle_types::models::{Post, PostPrivacy};

use crate::error::ApiError;

#[derive(Debug, Clone, Default)]
pub struct ViewerContext {
    pub viewer_id: i64,
    /// Authors the viewer follows with an accepted edge.
    pub following: HashSet<i64>,
    /// Private posts the viewer was explicitly granted.
    pub granted_posts: HashSet<i64>,
    /// Groups the viewer is an accepted member of.
    pub groups: HashSet<i64>,
}

impl ViewerContext {
    pub fn load(conn: &Connection, viewer_id: i64) -> Result<Self, ApiError> {
        Ok(Self {
            viewer_id,
            following: follows::accepted_followees(conn, viewer_id)?,
            granted_posts: posts::granted_post_ids(conn, viewer_id)?,
            groups: groups::accepted_group_ids(conn, viewer_id)?,
        })
    }
}

pub fn can_view(ctx: &ViewerContext, post: &Post) -> bool {
    if post.author_id == ctx.viewer_id {
        return true;
    }
    // Group posts are governed by membership alone.
    if let Some(group_id) = post.group_id {
        return ctx.groups.contains(&group_id);
    }
    match post.privacy {
        PostPrivacy::Public => true,
        PostPrivacy::Followers => ctx.following.contains(&post.author_id),
        PostPrivacy::Private => ctx.granted_posts.contains(&post.id),
    }
}

/// Load a post and check the caller may see it: 404 when missing, 403 when
/// hidden.
pub fn visible_post(conn: &Connection, viewer_id: i64, post_id: i64) -> Result<Post, ApiError> {
    let post = posts::by_id(conn, post_id)?.ok_or_else(|| ApiError::not_found("Post not found"))?;
    let ctx = ViewerContext::load(conn, viewer_id)?;
    if !can_view(&ctx, &post) {
        return Err(ApiError::forbidden("You cannot view this post"));
    }
    Ok(post)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post(id: i64, author_id: i64, privacy: PostPrivacy, group_id: Option<i64>) -> Post {
        Post {
            id,
            author_id,
            author_name: String::new(),
            author_avatar: String::new(),
            title: String::new(),
            content: String::new(),
            media: String::new(),
            privacy,
            group_id,
            created_at: Utc::now(),
        }
    }

    fn viewer(id: i64) -> ViewerContext {
        ViewerContext {
            viewer_id: id,
            ..Default::default()
        }
    }

    #[test]
    fn author_always_sees_own_posts() {
        let ctx = viewer(1);
        for privacy in [PostPrivacy::Public, PostPrivacy::Followers, PostPrivacy::Private] {
            assert!(can_view(&ctx, &post(10, 1, privacy, None)));
            assert!(can_view(&ctx, &post(11, 1, privacy, Some(99))));
        }
    }

    #[test]
    fn public_is_open() {
        let public = post(10, 1, PostPrivacy::Public, None);
        assert!(can_view(&viewer(2), &public));
    }

    #[test]
    fn followers_only_needs_accepted_follow_of_author() {
        let p = post(10, 1, PostPrivacy::Followers, None);
        let mut ctx = viewer(2);
        assert!(!can_view(&ctx, &p));

        // Following someone else does not help.
        ctx.following.insert(3);
        assert!(!can_view(&ctx, &p));

        ctx.following.insert(1);
        assert!(can_view(&ctx, &p));
    }

    #[test]
    fn private_needs_a_grant_for_that_post() {
        let p = post(10, 1, PostPrivacy::Private, None);
        let mut ctx = viewer(2);
        ctx.following.insert(1);
        assert!(!can_view(&ctx, &p));

        ctx.granted_posts.insert(11);
        assert!(!can_view(&ctx, &p));

        ctx.granted_posts.insert(10);
        assert!(can_view(&ctx, &p));
    }

    #[test]
    fn group_posts_need_membership_even_when_public() {
        let p = post(10, 1, PostPrivacy::Public, Some(5));
        let mut ctx = viewer(2);
        assert!(!can_view(&ctx, &p));

        ctx.groups.insert(5);
        assert!(can_view(&ctx, &p));
    }
}
