//! 会话筛选
//!
//! - 标签页：全部 / 人脉好友 / 市场
//! - 搜索：不区分大小写，匹配对方名称、关联商品标题、最后一条消息
//! - 未读角标：每个标签页的角标为该标签页下会话未读数之和（与搜索无关）

use serde::{Deserialize, Serialize};

use crate::types::{Conversation, ConversationContext};

/// 会话列表标签页
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationTab {
    #[default]
    All,
    Friends,
    Marketplace,
}

impl ConversationTab {
    pub const ALL: [ConversationTab; 3] = [
        ConversationTab::All,
        ConversationTab::Friends,
        ConversationTab::Marketplace,
    ];

    /// 会话是否属于该标签页
    pub fn matches(&self, conversation: &Conversation) -> bool {
        match self {
            ConversationTab::All => true,
            ConversationTab::Friends => conversation.context == ConversationContext::Connection,
            ConversationTab::Marketplace => {
                conversation.context == ConversationContext::Marketplace
            }
        }
    }
}

/// 各标签页未读角标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TabBadges {
    pub all: i64,
    pub friends: i64,
    pub marketplace: i64,
}

impl TabBadges {
    pub fn get(&self, tab: ConversationTab) -> i64 {
        match tab {
            ConversationTab::All => self.all,
            ConversationTab::Friends => self.friends,
            ConversationTab::Marketplace => self.marketplace,
        }
    }
}

/// 会话是否匹配搜索词（空搜索词匹配全部）
pub fn matches_query(conversation: &Conversation, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    let haystacks = [
        conversation.other_participant_name.as_deref(),
        conversation.listing.as_ref().map(|l| l.title.as_str()),
        conversation.last_message.as_deref(),
    ];

    haystacks
        .into_iter()
        .flatten()
        .any(|text| text.to_lowercase().contains(&needle))
}

/// 按标签页和搜索词筛选，保持原有顺序
pub fn filter_conversations(
    conversations: &[Conversation],
    tab: ConversationTab,
    query: &str,
) -> Vec<Conversation> {
    conversations
        .iter()
        .filter(|c| tab.matches(c) && matches_query(c, query))
        .cloned()
        .collect()
}

/// 计算各标签页未读角标
pub fn unread_badges(conversations: &[Conversation]) -> TabBadges {
    let sum = |tab: ConversationTab| -> i64 {
        conversations
            .iter()
            .filter(|c| tab.matches(c))
            .map(|c| c.unread_count)
            .sum()
    };

    TabBadges {
        all: sum(ConversationTab::All),
        friends: sum(ConversationTab::Friends),
        marketplace: sum(ConversationTab::Marketplace),
    }
}

/// 未读总数
pub fn total_unread(conversations: &[Conversation]) -> i64 {
    unread_badges(conversations).all
}


#[cfg(test)]
mod tests {
    use super::fixtures::conversation;
    use super::*;

    fn sample() -> Vec<Conversation> {
        vec![
            conversation("1", "Ada Lovelace", ConversationContext::Connection, 2, Some("See you at the meetup"), None),
            conversation("2", "Grace Hopper", ConversationContext::Marketplace, 3, Some("Is it available?"), Some("Standing Desk")),
            conversation("3", "Alan Turing", ConversationContext::Connection, 0, None, None),
            conversation("4", "Linus", ConversationContext::Marketplace, 1, Some("thanks"), Some("Office Chair")),
        ]
    }

    #[test]
    fn test_badges_sum_unread_per_tab() {
        let list = sample();
        let badges = unread_badges(&list);
        assert_eq!(badges.all, 6);
        assert_eq!(badges.friends, 2);
        assert_eq!(badges.marketplace, 4);

        for tab in ConversationTab::ALL {
            let expected: i64 = list
                .iter()
                .filter(|c| tab.matches(c))
                .map(|c| c.unread_count)
                .sum();
            assert_eq!(badges.get(tab), expected);
        }
    }

    #[test]
    fn test_query_matches_name_listing_and_message() {
        let list = sample();
        let ids = |query: &str| -> Vec<String> {
            filter_conversations(&list, ConversationTab::All, query)
                .into_iter()
                .map(|c| c.id)
                .collect()
        };

        assert_eq!(ids("ada"), vec!["1"]);
        assert_eq!(ids("DESK"), vec!["2"]);
        assert_eq!(ids("meetup"), vec!["1"]);
        assert_eq!(ids("chair"), vec!["4"]);
        assert_eq!(ids("zzz"), Vec::<String>::new());
        assert_eq!(ids("  "), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_tab_and_query_combine() {
        let list = sample();
        let result = filter_conversations(&list, ConversationTab::Marketplace, "a");
        let ids: Vec<_> = result.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "4"]);

        let friends = filter_conversations(&list, ConversationTab::Friends, "");
        assert_eq!(friends.len(), 2);
    }

    #[test]
    fn test_missing_fields_do_not_match() {
        let mut conv = conversation("9", "x", ConversationContext::Connection, 0, None, None);
        conv.other_participant_name = None;
        assert!(!matches_query(&conv, "x"));
        assert!(matches_query(&conv, ""));
    }
}
