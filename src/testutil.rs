//! Scripted in-memory stand-ins for the ledger and the platform gateway.
//! The `MemoryLedger` mirrors the SQL semantics the engines rely on:
//! insert-if-absent and delete-returning on the award key are atomic under
//! one lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};

use crate::db::ledger::{Ledger, LedgerResult};
use crate::db::models::account::{Account, CommunityId, House, HouseStanding, MemberId};
use crate::db::models::award::{AwardKey, MessageId, TakenAward};
use crate::gateway::{ChannelId, ChatGateway, FetchedMessage, GatewayErr, GatewayResult};

#[derive(Debug, Default)]
struct AccountState {
    house: Option<House>,
    points: i64,
    sorted_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct RecordedDelta {
    pub community: CommunityId,
    pub target: MemberId,
    pub source: MemberId,
    pub delta: i64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: Mutex<HashMap<(CommunityId, MemberId), AccountState>>,
    awards: Mutex<HashMap<AwardKey, (MemberId, i64)>>,
    deltas: Mutex<Vec<RecordedDelta>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self, community: &str, member: &str) -> i64 {
        self.accounts
            .lock()
            .unwrap()
            .get(&(community.into(), member.into()))
            .map(|a| a.points)
            .unwrap_or(0)
    }

    pub fn delta_count(&self) -> usize {
        self.deltas.lock().unwrap().len()
    }

    pub fn deltas(&self) -> Vec<RecordedDelta> {
        self.deltas.lock().unwrap().clone()
    }

    pub fn has_award(&self, community: &str, message: &str, reactor: &str, emoji: &str) -> bool {
        self.awards.lock().unwrap().contains_key(&AwardKey {
            community: community.into(),
            message: message.into(),
            reactor: reactor.into(),
            emoji: emoji.to_string(),
        })
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn upsert_account(
        &self,
        community: &CommunityId,
        member: &MemberId,
    ) -> LedgerResult<()> {
        self.accounts
            .lock()
            .unwrap()
            .entry((community.clone(), member.clone()))
            .or_default();
        Ok(())
    }

    async fn add_delta(
        &self,
        community: &CommunityId,
        target: &MemberId,
        source: &MemberId,
        delta: i64,
        reason: &str,
    ) -> LedgerResult<i64> {
        let mut accounts = self.accounts.lock().unwrap();
        let state = accounts
            .entry((community.clone(), target.clone()))
            .or_default();
        state.points += delta;
        let total = state.points;

        self.deltas.lock().unwrap().push(RecordedDelta {
            community: community.clone(),
            target: target.clone(),
            source: source.clone(),
            delta,
            reason: reason.to_string(),
        });

        Ok(total)
    }

    async fn set_classification(
        &self,
        community: &CommunityId,
        member: &MemberId,
        house: House,
    ) -> LedgerResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let state = accounts
            .entry((community.clone(), member.clone()))
            .or_default();
        state.house = Some(house);
        state.sorted_at = Some(Utc::now().naive_utc());
        Ok(())
    }

    async fn try_record_award(
        &self,
        key: &AwardKey,
        target: &MemberId,
        delta: i64,
    ) -> LedgerResult<bool> {
        let mut awards = self.awards.lock().unwrap();
        if awards.contains_key(key) {
            return Ok(false);
        }

        awards.insert(key.clone(), (target.clone(), delta));
        Ok(true)
    }

    async fn take_award(&self, key: &AwardKey) -> LedgerResult<Option<TakenAward>> {
        Ok(self
            .awards
            .lock()
            .unwrap()
            .remove(key)
            .map(|(target_id, delta)| TakenAward { delta, target_id }))
    }

    async fn get_account(
        &self,
        community: &CommunityId,
        member: &MemberId,
    ) -> LedgerResult<Option<Account>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(&(community.clone(), member.clone()))
            .map(|state| to_account(community, member, state)))
    }

    async fn leaderboard(
        &self,
        community: &CommunityId,
        limit: i64,
    ) -> LedgerResult<Vec<Account>> {
        let accounts = self.accounts.lock().unwrap();
        let mut rows: Vec<Account> = accounts
            .iter()
            .filter(|((c, _), _)| c == community)
            .map(|((c, m), state)| to_account(c, m, state))
            .collect();

        rows.sort_by(|a, b| b.points.cmp(&a.points));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn house_totals(&self, community: &CommunityId) -> LedgerResult<Vec<HouseStanding>> {
        let accounts = self.accounts.lock().unwrap();
        let mut totals: HashMap<House, i64> = HashMap::new();

        for ((c, _), state) in accounts.iter() {
            if c == community
                && let Some(house) = state.house
            {
                *totals.entry(house).or_default() += state.points;
            }
        }

        let mut rows: Vec<HouseStanding> = totals
            .into_iter()
            .map(|(house, total)| HouseStanding {
                house: house.as_str().to_string(),
                total,
            })
            .collect();

        rows.sort_by(|a, b| b.total.cmp(&a.total));
        Ok(rows)
    }
}

fn to_account(community: &CommunityId, member: &MemberId, state: &AccountState) -> Account {
    let now = Utc::now().naive_utc();
    Account {
        community_id: community.clone(),
        member_id: member.clone(),
        house: state.house.map(|h| h.as_str().to_string()),
        points: state.points,
        sorted_at: state.sorted_at,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Debug, Default)]
pub struct MockGateway {
    messages: Mutex<HashMap<(ChannelId, MessageId), FetchedMessage>>,
    dms: Mutex<Vec<(MemberId, String)>>,
    channel_sends: Mutex<Vec<(ChannelId, String)>>,
    fail_fetch: AtomicBool,
    dm_forbidden: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_message(&self, channel: &str, message: &str, fetched: FetchedMessage) {
        self.messages
            .lock()
            .unwrap()
            .insert((channel.into(), message.into()), fetched);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_dm_forbidden(&self, forbidden: bool) {
        self.dm_forbidden.store(forbidden, Ordering::SeqCst);
    }

    pub fn dms_for(&self, member: &MemberId) -> Vec<String> {
        self.dms
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == member)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn channel_sends(&self) -> Vec<(ChannelId, String)> {
        self.channel_sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for MockGateway {
    async fn fetch_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> GatewayResult<FetchedMessage> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(GatewayErr::Status(503));
        }

        self.messages
            .lock()
            .unwrap()
            .get(&(channel.clone(), message.clone()))
            .cloned()
            .ok_or(GatewayErr::NotFound)
    }

    async fn send_dm(&self, member: &MemberId, text: &str) -> GatewayResult<()> {
        if self.dm_forbidden.load(Ordering::SeqCst) {
            return Err(GatewayErr::Forbidden);
        }

        self.dms
            .lock()
            .unwrap()
            .push((member.clone(), text.to_string()));
        Ok(())
    }

    async fn send_channel(&self, channel: &ChannelId, text: &str) -> GatewayResult<()> {
        self.channel_sends
            .lock()
            .unwrap()
            .push((channel.clone(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn award_insert_is_exclusive_and_take_is_once() {
        let ledger = MemoryLedger::new();
        let key = AwardKey {
            community: "g".into(),
            message: "m".into(),
            reactor: "r".into(),
            emoji: "👍".to_string(),
        };
        let target = MemberId::from("t");

        assert!(ledger.try_record_award(&key, &target, 1).await.unwrap());
        assert!(!ledger.try_record_award(&key, &target, 1).await.unwrap());

        let taken = ledger.take_award(&key).await.unwrap().unwrap();
        assert_eq!(taken.delta, 1);
        assert_eq!(taken.target_id, target);

        assert!(ledger.take_award(&key).await.unwrap().is_none());
    }
}
