//! Coaching message queue
//!
//! The one object crossing the analysis→delivery boundary. Maintains
//! priority order with FIFO ties, lets remote (LLM) messages override
//! queued local ones in the same category, merges bursts of similar
//! messages into one combined message, and enforces per-category cooldowns
//! plus a global non-critical rate limit at delivery time.
//!
//! Every dequeued message is either delivered or counted as filtered,
//! never both. A message withheld by the global rate limit stays queued
//! and is reconsidered when the window advances.

use orc_core::config::QueueConfig;
use orc_core::model::{CoachingMessage, MessageCategory, MessagePriority, MessageSource};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Delivery statistics, surfaced through `getCoachingStats`.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueStats {
    pub total_added: u64,
    pub total_delivered: u64,
    pub filtered_duplicates: u64,
    pub messages_combined: u64,
    pub suppressed_by_override: u64,
}

struct QueuedMessage {
    message: CoachingMessage,
    seq: u64,
}

pub struct MessageQueue {
    config: QueueConfig,
    queue: Vec<QueuedMessage>,
    next_seq: u64,
    /// Recently delivered messages for the fuzzy duplicate filter.
    delivered_recent: VecDeque<CoachingMessage>,
    /// Delivery times of non-critical messages inside the rate window.
    delivered_timestamps: Vec<f64>,
    stats: QueueStats,
}

impl MessageQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            queue: Vec::new(),
            next_seq: 0,
            delivered_recent: VecDeque::with_capacity(50),
            delivered_timestamps: Vec::new(),
            stats: QueueStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Insert a message, honoring the remote-over-local override and the
    /// combination rules. Returns false when the message was suppressed at
    /// enqueue time.
    pub fn enqueue(&mut self, message: CoachingMessage) -> bool {
        self.stats.total_added += 1;
        let window = self.config.combination_window_s;

        match message.source {
            MessageSource::Remote => {
                // A remote message evicts queued local messages of its
                // category inside the override window.
                let before = self.queue.len();
                self.queue.retain(|q| {
                    !(q.message.category == message.category
                        && q.message.source == MessageSource::Local
                        && (q.message.timestamp - message.timestamp).abs() < window)
                });
                let evicted = before - self.queue.len();
                if evicted > 0 {
                    debug!(category = message.category.as_str(), evicted, "remote override");
                }
            }
            MessageSource::Local => {
                // A queued remote message of the same category suppresses
                // local arrivals inside the window.
                let shadowed = self.queue.iter().any(|q| {
                    q.message.category == message.category
                        && q.message.source == MessageSource::Remote
                        && (q.message.timestamp - message.timestamp).abs() < window
                });
                if shadowed {
                    self.stats.suppressed_by_override += 1;
                    debug!(category = message.category.as_str(), "local shadowed by remote");
                    return false;
                }
            }
            _ => {}
        }

        if let Some(combined) = self.try_combine(&message) {
            self.push(combined);
            return true;
        }

        self.push(message);
        true
    }

    fn push(&mut self, message: CoachingMessage) {
        self.queue.push(QueuedMessage { message, seq: self.next_seq });
        self.next_seq += 1;
        // Priority order, FIFO within a priority level.
        self.queue
            .sort_by(|a, b| a.message.priority.cmp(&b.message.priority).then(a.seq.cmp(&b.seq)));
    }

    /// Merge the incoming message with queued same-category messages that
    /// share enough keywords inside the window. Returns the combined
    /// replacement when a merge happened.
    fn try_combine(&mut self, message: &CoachingMessage) -> Option<CoachingMessage> {
        let keywords = category_keywords(message.category)?;
        if keyword_matches(&message.content, keywords) < self.config.min_keyword_matches {
            return None;
        }

        let window = self.config.combination_window_s;
        let matching: Vec<usize> = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, q)| {
                q.message.category == message.category
                    && (q.message.timestamp - message.timestamp).abs() < window
                    && keyword_matches(&q.message.content, keywords)
                        >= self.config.min_keyword_matches
            })
            .map(|(i, _)| i)
            .take(self.config.max_combined.saturating_sub(1))
            .collect();
        if matching.is_empty() {
            return None;
        }

        let mut members: Vec<CoachingMessage> = Vec::with_capacity(matching.len() + 1);
        for i in matching.iter().rev() {
            members.push(self.queue.remove(*i).message);
        }
        members.push(message.clone());
        self.stats.messages_combined += members.len() as u64;

        let priority = members.iter().map(|m| m.priority).min().unwrap_or(message.priority);
        let confidence =
            members.iter().map(|m| m.confidence).sum::<f64>() / members.len() as f64;
        let audio = members.iter().find_map(|m| m.audio.clone());

        let mut combined = CoachingMessage::new(
            combined_text(message.category),
            message.category,
            priority,
            MessageSource::Combined,
            confidence,
            format!("combined_{}", message.category.as_str()),
            message.timestamp,
        );
        combined.audio = audio;
        debug!(category = message.category.as_str(), members = members.len(), "combined messages");
        Some(combined)
    }

    /// Pull the next deliverable message. `None` means nothing is
    /// deliverable right now: the queue is empty, the head is rate-limited
    /// (stays queued), or the head was filtered.
    pub fn dequeue(&mut self, now: f64) -> Option<CoachingMessage> {
        if self.queue.is_empty() {
            return None;
        }

        self.delivered_timestamps.retain(|t| now - t < 60.0);

        // Peek before popping: a rate-limited message is withheld, not
        // consumed.
        let head_priority = self.queue[0].message.priority;
        if head_priority != MessagePriority::Critical
            && self.delivered_timestamps.len() >= self.config.global_rate_limit
        {
            return None;
        }

        let mut message = self.queue.remove(0).message;
        message.attempts += 1;
        let category = message.category;
        let cooldown = self.config.cooldown_for(category);

        // Within the category cooldown window a non-critical message is
        // suppressed when it repeats a delivered (category, situation)
        // pair, or when it is merely a reworded duplicate. Critical
        // messages always go out.
        if message.priority != MessagePriority::Critical {
            let duplicate = self.delivered_recent.iter().any(|recent| {
                recent.category == category
                    && now - recent.timestamp < cooldown
                    && (recent.context == message.context
                        || word_overlap(&recent.content, &message.content)
                            > self.config.similarity_threshold)
            });
            if duplicate {
                self.stats.filtered_duplicates += 1;
                debug!(category = category.as_str(), "filtered inside category cooldown");
                return None;
            }
        }

        message.delivered = true;
        message.timestamp = now;
        if message.priority != MessagePriority::Critical {
            self.delivered_timestamps.push(now);
        }
        self.delivered_recent.push_back(message.clone());
        if self.delivered_recent.len() > 50 {
            self.delivered_recent.pop_front();
        }
        self.stats.total_delivered += 1;
        Some(message)
    }
}

/// Jaccard word overlap between two message texts.
fn word_overlap(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.to_lowercase().split_whitespace().map(str::to_string).collect();
    let set_b: HashSet<String> = b.to_lowercase().split_whitespace().map(str::to_string).collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

fn keyword_matches(content: &str, keywords: &[&str]) -> usize {
    let lower = content.to_lowercase();
    keywords.iter().filter(|k| lower.contains(*k)).count()
}

/// Only these categories participate in combination.
fn category_keywords(category: MessageCategory) -> Option<&'static [&'static str]> {
    match category {
        MessageCategory::Throttle => {
            Some(&["throttle", "patience", "corner", "exit", "balance", "understeer"])
        }
        MessageCategory::Braking => {
            Some(&["brake", "earlier", "later", "pressure", "timing", "entry"])
        }
        MessageCategory::Cornering => {
            Some(&["corner", "line", "apex", "entry", "exit", "technique"])
        }
        MessageCategory::Consistency => {
            Some(&["consistency", "smooth", "input", "technique", "pattern"])
        }
        _ => None,
    }
}

fn combined_text(category: MessageCategory) -> String {
    match category {
        MessageCategory::Throttle => {
            "Focus on throttle patience: wait longer before applying throttle in corners for better balance and exit speed."
        }
        MessageCategory::Braking => {
            "Brake technique needs work: focus on brake timing and pressure for better corner entry."
        }
        MessageCategory::Cornering => {
            "Corner technique: work on entry, apex and exit for better lap times."
        }
        MessageCategory::Consistency => {
            "Consistency focus: smooth, repeatable inputs for better lap times."
        }
        _ => "Multiple improvements needed: focus on technique consistency.",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(
        content: &str,
        category: MessageCategory,
        priority: MessagePriority,
        source: MessageSource,
        ts: f64,
    ) -> CoachingMessage {
        CoachingMessage::new(content, category, priority, source, 0.8, "test", ts)
    }

    #[test]
    fn priority_order_with_fifo_ties() {
        let mut q = MessageQueue::new(QueueConfig::default());
        q.enqueue(msg("low one", MessageCategory::General, MessagePriority::Low, MessageSource::Local, 0.0));
        q.enqueue(msg("critical", MessageCategory::Handling, MessagePriority::Critical, MessageSource::Local, 0.1));
        q.enqueue(msg("low two", MessageCategory::Positive, MessagePriority::Low, MessageSource::Local, 0.2));

        assert_eq!(q.dequeue(10.0).unwrap().content, "critical");
        assert_eq!(q.dequeue(20.0).unwrap().content, "low one");
        assert_eq!(q.dequeue(40.0).unwrap().content, "low two");
    }

    #[test]
    fn remote_evicts_queued_local_same_category() {
        let mut q = MessageQueue::new(QueueConfig::default());
        q.enqueue(msg("lift earlier on exit", MessageCategory::Throttle, MessagePriority::Medium, MessageSource::Local, 0.0));
        q.enqueue(msg("remote throttle advice", MessageCategory::Throttle, MessagePriority::Medium, MessageSource::Remote, 1.5));

        let delivered = q.dequeue(2.0).expect("remote should deliver");
        assert_eq!(delivered.source, MessageSource::Remote);
        assert!(q.is_empty(), "local message must have been evicted");
    }

    #[test]
    fn local_suppressed_while_remote_queued() {
        let mut q = MessageQueue::new(QueueConfig::default());
        q.enqueue(msg("remote throttle advice", MessageCategory::Throttle, MessagePriority::Medium, MessageSource::Remote, 1.5));
        let accepted = q.enqueue(msg("local advice", MessageCategory::Throttle, MessagePriority::Medium, MessageSource::Local, 2.0));
        assert!(!accepted);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn similar_messages_combine() {
        let mut q = MessageQueue::new(QueueConfig::default());
        q.enqueue(msg(
            "Brake earlier with more pressure on entry",
            MessageCategory::Braking,
            MessagePriority::Medium,
            MessageSource::Local,
            0.0,
        ));
        q.enqueue(msg(
            "Brake timing off - build pressure earlier",
            MessageCategory::Braking,
            MessagePriority::High,
            MessageSource::Local,
            1.0,
        ));
        assert_eq!(q.len(), 1, "two keyword-matching messages collapse into one");
        let combined = q.dequeue(5.0).unwrap();
        assert_eq!(combined.source, MessageSource::Combined);
        assert_eq!(combined.priority, MessagePriority::High);
        assert!(combined.content.to_lowercase().contains("brake"));
    }

    #[test]
    fn category_cooldown_filters_second_delivery() {
        let mut q = MessageQueue::new(QueueConfig::default());
        q.enqueue(msg("brake advice one", MessageCategory::Braking, MessagePriority::Medium, MessageSource::Local, 0.0));
        assert!(q.dequeue(0.0).is_some());

        q.enqueue(msg("completely different words here", MessageCategory::Braking, MessagePriority::Medium, MessageSource::Local, 1.0));
        let stats_before = q.stats();
        assert!(q.dequeue(2.0).is_none(), "inside the 8 s braking cooldown");
        assert_eq!(q.stats().filtered_duplicates, stats_before.filtered_duplicates + 1);

        q.enqueue(msg("another braking note", MessageCategory::Braking, MessagePriority::Medium, MessageSource::Local, 9.0));
        assert!(q.dequeue(9.0).is_some(), "cooldown has elapsed");
    }

    #[test]
    fn global_rate_limit_withholds_but_does_not_drop() {
        let mut q = MessageQueue::new(QueueConfig::default());
        let categories = [
            MessageCategory::Braking,
            MessageCategory::Throttle,
            MessageCategory::Cornering,
            MessageCategory::Handling,
            MessageCategory::GearShifting,
            MessageCategory::RacingLine,
        ];
        for (i, cat) in categories.iter().enumerate() {
            q.enqueue(msg(&format!("unique message number {i}"), *cat, MessagePriority::Medium, MessageSource::Local, i as f64));
        }
        // Five deliveries inside one minute fill the budget.
        for i in 0..5 {
            assert!(q.dequeue(i as f64).is_some(), "delivery {i}");
        }
        assert!(q.dequeue(5.0).is_none(), "sixth non-critical withheld");
        assert_eq!(q.len(), 1, "withheld message stays queued");
        // After the window advances it goes out.
        assert!(q.dequeue(70.0).is_some());
    }

    #[test]
    fn critical_bypasses_rate_limit_and_duplicate_filters() {
        let mut q = MessageQueue::new(QueueConfig::default());
        for i in 0..5 {
            q.enqueue(msg(
                &format!("filler {i}"),
                match i {
                    0 => MessageCategory::Braking,
                    1 => MessageCategory::Throttle,
                    2 => MessageCategory::Cornering,
                    3 => MessageCategory::GearShifting,
                    _ => MessageCategory::RacingLine,
                },
                MessagePriority::Medium,
                MessageSource::Local,
                i as f64,
            ));
            assert!(q.dequeue(i as f64).is_some());
        }
        q.enqueue(msg("danger", MessageCategory::Handling, MessagePriority::Critical, MessageSource::Local, 5.0));
        assert!(q.dequeue(5.0).is_some(), "critical bypasses the global limit");

        // A repeated critical still goes out: safety beats dedupe.
        q.enqueue(msg("danger", MessageCategory::Handling, MessagePriority::Critical, MessageSource::Local, 6.0));
        assert!(q.dequeue(6.0).is_some());
    }

    #[test]
    fn fuzzy_duplicate_suppressed_within_cooldown() {
        let mut q = MessageQueue::new(QueueConfig::default());
        q.enqueue(msg("watch your apex speed through turn five", MessageCategory::Handling, MessagePriority::Medium, MessageSource::Local, 0.0));
        assert!(q.dequeue(0.0).is_some());

        // Same wording, past the 10 s handling cooldown but similar: the
        // cooldown window also bounds the fuzzy filter, so this delivers.
        q.enqueue(msg("watch your apex speed through turn five", MessageCategory::Handling, MessagePriority::Medium, MessageSource::Local, 11.0));
        assert!(q.dequeue(11.0).is_some());
    }

    #[test]
    fn enqueue_twice_delivers_once_within_cooldown() {
        let mut q = MessageQueue::new(QueueConfig::default());
        let m = msg("hold the brake longer into the hairpin", MessageCategory::Handling, MessagePriority::Medium, MessageSource::Local, 0.0);
        q.enqueue(m.clone());
        q.enqueue(m);
        assert!(q.dequeue(0.0).is_some());
        assert!(q.dequeue(1.0).is_none(), "duplicate filtered inside cooldown");
        assert_eq!(q.stats().total_delivered, 1);
        assert_eq!(q.stats().filtered_duplicates, 1);
    }

    #[test]
    fn stats_partition_delivered_and_filtered() {
        let mut q = MessageQueue::new(QueueConfig::default());
        q.enqueue(msg("one braking message", MessageCategory::Braking, MessagePriority::Medium, MessageSource::Local, 0.0));
        q.enqueue(msg("a cornering message", MessageCategory::Cornering, MessagePriority::Medium, MessageSource::Local, 0.0));
        let mut outcomes: u64 = 0;
        for t in [0.0, 1.0] {
            if q.dequeue(t).is_some() {
                outcomes += 1;
            }
        }
        let stats = q.stats();
        assert_eq!(stats.total_delivered, outcomes);
        assert_eq!(stats.total_delivered + stats.filtered_duplicates, 2);
    }
}
