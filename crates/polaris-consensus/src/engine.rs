//! Consensus round state machine.
//!
//! One cooperative `round_driver` per node: the engine is the sole writer
//! of the chain state, the active round, and the collector. Network ingress
//! feeds announcements and blocks through bounded channels; the miner runs
//! on a blocking worker and is cancelled the moment the round moves on.
//!
//! Per height: derive the seed, gossip our VRF announcement, collect the
//! round, then either mine (we won) or wait for the winner's block, and
//! commit whatever validates. Every timeout or rejection bumps the round
//! and retries the same height with a fresh seed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use polaris_core::{
    round_seed, AccountState, Block, BlockStore, ChainState, ConsensusConfig, Mempool, Network,
    SignedAnnouncement, StateDelta, StateSnapshot, StateStore, StoreError, VrfAnnouncement,
};
use polaris_crypto::{vrf_evaluate, Hash, Keypair, PublicKey};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::{RoundResult, VrfCollector};
use crate::difficulty::DifficultyCalculator;
use crate::error::{ConsensusError, Result};
use crate::pow;
use crate::proposer::BlockProposer;
use crate::registry::SuperNodeRegistry;
use crate::score::ScoreCalculator;
use crate::validator::{BlockValidator, ValidationContext, ValidationMode};

/// Current wall time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Result of one engine step (one round attempt at the current height).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// A block was committed at this height.
    Committed(u64),
    /// The round failed; the engine retries the height at `round + 1`.
    Retry(RetryReason),
    /// The shutdown token fired.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// The collection window closed below the ⌈2N/3⌉ threshold.
    InsufficientQuorum,
    /// We were elected but could not find a nonce within the budget.
    MiningTimeout,
    /// No valid block arrived before the round budget elapsed.
    NoValidBlock,
}

/// Sender half of the engine ingress, held by the network task.
#[derive(Clone)]
pub struct IngressSender {
    pub announcements: mpsc::Sender<SignedAnnouncement>,
    pub blocks: mpsc::Sender<Block>,
}

/// Receiver half, owned by the engine.
pub struct IngressReceiver {
    announcements: mpsc::Receiver<SignedAnnouncement>,
    blocks: mpsc::Receiver<Block>,
}

/// Bounded ingress queues between the network task and the round driver.
pub fn ingress_channel(capacity: usize) -> (IngressSender, IngressReceiver) {
    let (ann_tx, ann_rx) = mpsc::channel(capacity);
    let (block_tx, block_rx) = mpsc::channel(capacity);
    (
        IngressSender { announcements: ann_tx, blocks: block_tx },
        IngressReceiver { announcements: ann_rx, blocks: block_rx },
    )
}

pub struct ConsensusEngine<B, S, N> {
    config: ConsensusConfig,
    keypair: Keypair,
    registry: Arc<parking_lot::RwLock<SuperNodeRegistry>>,
    mempool: Arc<Mempool>,
    block_store: Arc<B>,
    state_store: Arc<S>,
    network: Arc<N>,
    chain_state: ChainState,
    proposer: BlockProposer,
    validator: BlockValidator,
    score_calculator: ScoreCalculator,
    difficulty_calculator: DifficultyCalculator,
    ingress: IngressReceiver,
    shutdown: CancellationToken,
}

impl<B, S, N> ConsensusEngine<B, S, N>
where
    B: BlockStore,
    S: StateStore,
    N: Network,
{
    /// Build an engine over validated config and initialized stores.
    ///
    /// An empty block store is seeded with the deterministic genesis block;
    /// an empty state store gets an empty height-0 snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConsensusConfig,
        keypair: Keypair,
        registry: Arc<parking_lot::RwLock<SuperNodeRegistry>>,
        mempool: Arc<Mempool>,
        block_store: Arc<B>,
        state_store: Arc<S>,
        network: Arc<N>,
        ingress: IngressReceiver,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        if block_store.current_height()?.is_none() {
            let genesis = Block::genesis(config.pow_base_difficulty);
            info!(hash = %hex::encode(genesis.hash()), "🌱 seeding genesis block");
            block_store.put(&genesis)?;
        }
        if state_store.current().is_err() {
            state_store.apply(&StateDelta { height: 0, accounts: HashMap::new() })?;
        }

        let tip_height = block_store
            .current_height()?
            .ok_or(StoreError::NotFound(0))?;
        let tip = block_store
            .get_by_height(tip_height)?
            .ok_or(StoreError::NotFound(tip_height))?;
        let state = state_store.current()?;
        let total_supply: u128 = state.accounts.values().map(|a| a.balance as u128).sum();

        let chain_state = ChainState::at_tip(&tip, total_supply, config.super_node_count, now_ms());

        Ok(Self {
            proposer: BlockProposer::new(config.clone(), keypair.clone()),
            validator: BlockValidator::new(&config),
            score_calculator: ScoreCalculator::new(&config),
            difficulty_calculator: DifficultyCalculator::new(&config),
            config,
            keypair,
            registry,
            mempool,
            block_store,
            state_store,
            network,
            chain_state,
            ingress,
            shutdown,
        })
    }

    pub fn chain_state(&self) -> &ChainState {
        &self.chain_state
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Drive rounds until shutdown. Retries are unbounded at this layer;
    /// halting policy belongs to the embedding application.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            node = %self.keypair.public_key(),
            height = self.chain_state.current_height,
            "consensus engine started"
        );
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            match self.step().await? {
                RoundOutcome::Committed(_) => {}
                RoundOutcome::Retry(reason) => {
                    self.chain_state.current_round += 1;
                    warn!(
                        height = self.chain_state.current_height + 1,
                        round = self.chain_state.current_round,
                        ?reason,
                        "🔁 round failed, retrying height"
                    );
                }
                RoundOutcome::Shutdown => return Ok(()),
            }
        }
    }

    /// Execute one round attempt at the current height.
    pub async fn step(&mut self) -> Result<RoundOutcome> {
        let tip_height = self.chain_state.current_height;
        let prev = self
            .block_store
            .get_by_height(tip_height)?
            .ok_or(StoreError::NotFound(tip_height))?;

        let round = self.chain_state.current_round;
        let now = now_ms();
        let epoch = self.config.epoch_for(now);
        let epoch_ms = epoch * self.config.epoch_length_ms;
        let seed = round_seed(&prev.hash(), round as u64, epoch);

        let eligible = self.registry.read().eligible_set();
        let my_pk = self.keypair.public_key();

        let my_profile = match eligible.get(&my_pk) {
            Some(profile) => *profile,
            None => {
                // Not a participant this round: observe and commit whatever
                // the super nodes produce.
                debug!("not in the eligible set, observing");
                return self.await_block(&prev, self.config.block_time_ms).await;
            }
        };

        // Gossip our own VRF contribution.
        let (vrf_output, vrf_proof) = vrf_evaluate(&self.keypair, &seed);
        let score = self.score_calculator.score(
            &vrf_output,
            my_profile.stake,
            eligible.average_stake,
            my_profile.elected_at_ms,
            epoch_ms,
            my_profile.uptime_pct,
        );
        let own = VrfAnnouncement {
            round: round as u64,
            public_key: my_pk,
            vrf_output,
            vrf_proof,
            score,
            timestamp: now,
        };
        let signed = SignedAnnouncement::new(&self.keypair, own.clone());
        if let Err(e) = self.network.broadcast_announcement(&signed).await {
            warn!(error = %e, "announcement broadcast failed");
        }

        let mut collector =
            VrfCollector::new(&self.config, eligible, seed, round as u64, epoch_ms);
        let _ = collector.admit(own);

        // ── Collection phase ───────────────────────────────────────────
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.vrf_collection_timeout_ms);
        loop {
            if collector.is_complete() {
                break;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    collector.abort();
                    return Ok(RoundOutcome::Shutdown);
                }
                _ = tokio::time::sleep_until(deadline) => break,
                maybe = self.ingress.announcements.recv() => {
                    let Some(signed) = maybe else {
                        return Err(ConsensusError::ChannelClosed);
                    };
                    if signed.verify() {
                        let _ = collector.admit(signed.announcement);
                    } else {
                        debug!("dropping announcement with invalid envelope signature");
                    }
                }
                maybe = self.ingress.blocks.recv() => {
                    let Some(block) = maybe else {
                        return Err(ConsensusError::ChannelClosed);
                    };
                    // A finished block ends the round early regardless of
                    // our own collection progress.
                    if self.try_commit(&block, &prev)? {
                        collector.abort();
                        return Ok(RoundOutcome::Committed(block.height));
                    }
                }
            }
        }

        let result = match collector.close() {
            Ok(result) => result,
            Err(ConsensusError::InsufficientQuorum { got, needed }) => {
                warn!(got, needed, round, "insufficient quorum");
                return Ok(RoundOutcome::Retry(RetryReason::InsufficientQuorum));
            }
            Err(e) => return Err(e),
        };

        if result.winner.public_key == my_pk {
            info!(height = prev.height + 1, round, "🎯 elected proposer");
            self.propose_and_mine(&prev, round, result).await
        } else {
            debug!(winner = %result.winner.public_key, "awaiting the winner's block");
            self.await_block(&prev, self.config.block_production_timeout_ms).await
        }
    }

    /// Build, mine, broadcast, and commit our own block. A competing valid
    /// block arriving mid-mine cancels the miner and commits instead.
    async fn propose_and_mine(
        &mut self,
        prev: &Block,
        round: u32,
        result: RoundResult,
    ) -> Result<RoundOutcome> {
        let state = self.state_store.snapshot_at(prev.height)?;
        let timestamps = self.recent_timestamps(prev)?;
        let target = self
            .difficulty_calculator
            .next_target(prev.difficulty_target, &timestamps);
        let transactions = self.mempool.snapshot_ordered();

        let candidate = self.proposer.build_candidate(
            prev,
            round,
            result,
            transactions,
            &state,
            target,
            now_ms(),
        )?;

        let params = candidate.mining_params();
        let mining_cancel = self.shutdown.child_token();
        let worker_cancel = mining_cancel.clone();
        let deadline = std::time::Instant::now()
            + Duration::from_millis(self.config.block_production_timeout_ms);
        let mut mining =
            tokio::task::spawn_blocking(move || pow::mine(&params, deadline, &worker_cancel));

        let outcome = loop {
            tokio::select! {
                joined = &mut mining => {
                    break joined.map_err(|e| {
                        ConsensusError::FatalCrypto(format!("mining worker panicked: {e}"))
                    })?;
                }
                maybe = self.ingress.blocks.recv() => {
                    let Some(block) = maybe else {
                        mining_cancel.cancel();
                        return Err(ConsensusError::ChannelClosed);
                    };
                    if self.try_commit(&block, prev)? {
                        mining_cancel.cancel();
                        return Ok(RoundOutcome::Committed(block.height));
                    }
                }
                _ = self.shutdown.cancelled() => {
                    mining_cancel.cancel();
                    return Ok(RoundOutcome::Shutdown);
                }
            }
        };

        let mined = match outcome {
            Ok(mined) => mined,
            Err(ConsensusError::Timeout(_)) => {
                warn!(round, "mining deadline elapsed");
                return Ok(RoundOutcome::Retry(RetryReason::MiningTimeout));
            }
            Err(e) => return Err(e),
        };

        info!(
            nonce = mined.nonce,
            attempts = mined.attempts,
            elapsed_ms = mined.elapsed.as_millis() as u64,
            "⛏️  nonce found"
        );
        let block = self.proposer.finalize(candidate, mined.nonce);

        if let Err(e) = self.network.broadcast_block(&block).await {
            warn!(error = %e, "block broadcast failed");
        }

        if self.try_commit(&block, prev)? {
            Ok(RoundOutcome::Committed(block.height))
        } else {
            // Our own block failed validation — treat like any other round
            // failure and retry.
            Ok(RoundOutcome::Retry(RetryReason::NoValidBlock))
        }
    }

    /// Wait up to `budget_ms` for a committable block from the network.
    async fn await_block(&mut self, prev: &Block, budget_ms: u64) -> Result<RoundOutcome> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(budget_ms);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(RoundOutcome::Shutdown),
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(RoundOutcome::Retry(RetryReason::NoValidBlock));
                }
                maybe = self.ingress.blocks.recv() => {
                    let Some(block) = maybe else {
                        return Err(ConsensusError::ChannelClosed);
                    };
                    if self.try_commit(&block, prev)? {
                        return Ok(RoundOutcome::Committed(block.height));
                    }
                }
                maybe = self.ingress.announcements.recv() => {
                    // Late announcements for a closed round are dropped, but
                    // the queue must keep draining.
                    if maybe.is_none() {
                        return Err(ConsensusError::ChannelClosed);
                    }
                }
            }
        }
    }

    /// Validate in live mode and, on success, commit atomically:
    /// `BlockStore.put` → `StateStore.apply` → `ChainState.advance`.
    /// Returns `Ok(false)` for a rejected block (no state mutated).
    fn try_commit(&mut self, block: &Block, prev: &Block) -> Result<bool> {
        if block.height != prev.height + 1 {
            debug!(
                got = block.height,
                expected = prev.height + 1,
                "ignoring block at unexpected height"
            );
            return Ok(false);
        }

        let eligible = self.registry.read().eligible_set();
        let state = self.state_store.snapshot_at(prev.height)?;
        let timestamps = self.recent_timestamps(prev)?;
        let ctx = ValidationContext {
            previous_block: prev,
            expected_height: prev.height + 1,
            eligible: &eligible,
            state: &state,
            recent_timestamps: &timestamps,
            now_ms: now_ms(),
            mode: ValidationMode::Live,
        };
        match self.validator.validate(block, &ctx) {
            Ok(()) => {}
            Err(ConsensusError::Rejected { .. }) => return Ok(false), // already logged
            Err(e) => return Err(e),
        }

        let (delta, supply_change) = build_state_delta(block, &state);
        // Transfers and fee redistribution move value, never create it.
        debug_assert_eq!(supply_change, 0);
        self.block_store.put(block)?;
        self.state_store.apply(&delta)?;
        self.chain_state.advance(block, supply_change, now_ms());

        let committed: Vec<Hash> = block.transactions.iter().map(|tx| tx.hash()).collect();
        self.mempool.remove(&committed);

        info!(
            height = block.height,
            round = block.round,
            txs = block.transactions.len(),
            proposer = %block.proposer,
            hash = %hex::encode(block.hash()),
            "📦 block committed"
        );
        Ok(true)
    }

    /// Timestamps of the recent post-genesis blocks feeding the difficulty
    /// window, ascending. Empty when only genesis exists.
    fn recent_timestamps(&self, prev: &Block) -> Result<Vec<u64>> {
        if prev.height == 0 {
            return Ok(Vec::new());
        }
        let start = prev
            .height
            .saturating_sub(self.config.difficulty_window as u64)
            .max(1);
        let mut timestamps = Vec::with_capacity((prev.height - start + 1) as usize);
        for height in start..=prev.height {
            let block = self
                .block_store
                .get_by_height(height)?
                .ok_or(StoreError::NotFound(height))?;
            timestamps.push(block.timestamp);
        }
        Ok(timestamps)
    }
}

/// Post-state of the accounts a block touches: debits and nonce bumps for
/// senders, credits for recipients, and all fees to the proposer. Also
/// returns the delta's net supply change (post minus pre over the touched
/// accounts), which the chain state absorbs at commit.
fn build_state_delta(block: &Block, state: &StateSnapshot) -> (StateDelta, i128) {
    let mut accounts: HashMap<PublicKey, AccountState> = HashMap::new();

    fn account_of(
        accounts: &HashMap<PublicKey, AccountState>,
        state: &StateSnapshot,
        pk: &PublicKey,
    ) -> AccountState {
        accounts
            .get(pk)
            .copied()
            .unwrap_or(AccountState { balance: state.balance_of(pk), nonce: state.nonce_of(pk) })
    }

    let mut fees: u64 = 0;
    for tx in &block.transactions {
        let mut sender = account_of(&accounts, state, &tx.sender);
        sender.balance = sender.balance.saturating_sub(tx.amount + tx.fee);
        sender.nonce += 1;
        accounts.insert(tx.sender, sender);

        let mut recipient = account_of(&accounts, state, &tx.recipient);
        recipient.balance = recipient.balance.saturating_add(tx.amount);
        accounts.insert(tx.recipient, recipient);

        fees = fees.saturating_add(tx.fee);
    }
    if fees > 0 {
        let mut proposer = account_of(&accounts, state, &block.proposer);
        proposer.balance = proposer.balance.saturating_add(fees);
        accounts.insert(block.proposer, proposer);
    }

    let pre: u128 = accounts.keys().map(|pk| state.balance_of(pk) as u128).sum();
    let post: u128 = accounts.values().map(|a| a.balance as u128).sum();
    let supply_change = post as i128 - pre as i128;

    (StateDelta { height: block.height, accounts }, supply_change)
}
