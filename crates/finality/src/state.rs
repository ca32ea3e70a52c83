//! The per-block finalization state and its transition rules.

use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::{debug, trace, warn};

use unite_primitives::amount::{Amount, UNIT};
use unite_primitives::buf::{Buf20, Buf32};
use unite_primitives::params::{self, AdminKey, Dynasty, Epoch, Height, Parameters};
use unite_primitives::ufp64::Ufp64;
use unite_state::admin::{AdminCommand, AdminState};
use unite_state::block::{Block, BlockIndex};
use unite_state::checkpoint::Checkpoint;
use unite_state::data::FinalizationStateData;
use unite_state::transaction::{Transaction, TxPayload};
use unite_state::validator::{Validator, DEFAULT_END_DYNASTY};
use unite_state::vote::Vote;

use crate::result::ValidationError;

/// Version byte preceding the persisted state encoding.
pub const STATE_ENCODING_VERSION: u8 = 1;

/// Stage of a state's initialization.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum InitStatus {
    /// State is just created (cloned from its parent).
    New = 0,
    /// State initialized from finalizer commits only.
    FromCommits = 1,
    /// State initialization completed using a full block.
    Completed = 2,
}

impl InitStatus {
    fn from_u8(tag: u8) -> Option<InitStatus> {
        match tag {
            0 => Some(InitStatus::New),
            1 => Some(InitStatus::FromCommits),
            2 => Some(InitStatus::Completed),
            _ => None,
        }
    }
}

/// The finalization state after some block.
///
/// Pure and deterministic: the only inputs are the network parameters,
/// the parent state and the block contents. Mutation happens under the
/// state repository's lock; see the concurrency notes in DESIGN.md.
#[derive(Clone, Debug)]
pub struct FinalizationState {
    params: Arc<Parameters>,
    data: FinalizationStateData,
    status: InitStatus,
}

impl PartialEq for FinalizationState {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.status == other.status
    }
}

impl Eq for FinalizationState {}

impl FinalizationState {
    /// The state at genesis, derived from parameters alone.
    pub fn genesis(params: Arc<Parameters>) -> FinalizationState {
        let admin = params.admin_keys.map(AdminState::new);
        FinalizationState {
            params,
            data: FinalizationStateData::genesis(admin),
            status: InitStatus::Completed,
        }
    }

    /// A fresh state derived from a parent, ready to consume the next
    /// block.
    pub fn from_parent(parent: &FinalizationState) -> FinalizationState {
        FinalizationState {
            params: parent.params.clone(),
            data: parent.data.clone(),
            status: InitStatus::New,
        }
    }

    pub fn init_status(&self) -> InitStatus {
        self.status
    }

    pub fn data(&self) -> &FinalizationStateData {
        &self.data
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn current_epoch(&self) -> Epoch {
        self.data.current_epoch
    }

    pub fn current_dynasty(&self) -> Dynasty {
        self.data.current_dynasty
    }

    pub fn last_justified_epoch(&self) -> Epoch {
        self.data.last_justified_epoch
    }

    pub fn last_finalized_epoch(&self) -> Epoch {
        self.data.last_finalized_epoch
    }

    pub fn expected_source_epoch(&self) -> Epoch {
        self.data.expected_source_epoch
    }

    pub fn validator(&self, address: &Buf20) -> Option<&Validator> {
        self.data.validators.get(address)
    }

    pub fn active_finalizers(&self) -> Vec<&Validator> {
        self.data
            .validators
            .values()
            .filter(|v| v.is_in_dynasty(self.data.current_dynasty))
            .collect()
    }

    /// Effective deposit of a finalizer, zero once slashed.
    pub fn deposit_size(&self, address: &Buf20) -> Amount {
        match self.data.validators.get(address) {
            Some(v) if !v.is_slashed => self
                .deposit_scale_factor(self.data.current_epoch)
                .mul_to_uint(v.deposit) as Amount,
            _ => 0,
        }
    }

    pub fn last_tx_hash(&self, address: &Buf20) -> Option<Buf32> {
        self.data
            .validators
            .get(address)
            .map(|v| v.last_transaction_hash)
    }

    /// Whether the finalizer may vote in the current voting window
    /// (current or previous dynasty, not slashed).
    pub fn is_finalizer_voting(&self, finalizer: &Validator) -> bool {
        if finalizer.is_slashed {
            return false;
        }
        let cur = self.data.current_dynasty;
        finalizer.is_in_dynasty(cur) || (cur > 0 && finalizer.is_in_dynasty(cur - 1))
    }

    pub fn recommended_target_epoch(&self) -> Epoch {
        self.data.current_epoch.saturating_sub(1)
    }

    /// The vote this node recommends a finalizer to cast right now.
    pub fn recommended_vote(&self, validator_address: &Buf20) -> Vote {
        Vote {
            validator_address: *validator_address,
            target_hash: self.data.recommended_target_hash,
            source_epoch: self.data.expected_source_epoch,
            target_epoch: self.recommended_target_epoch(),
        }
    }

    /// Sets the checkpoint hash votes must target. Driven by
    /// `process_new_tip`/`process_new_commits`; exposed for callers
    /// that step the machine directly.
    pub fn set_recommended_target(&mut self, hash: Buf32, epoch: Epoch) {
        self.data.recommended_target_hash = hash;
        self.data.recommended_target_epoch = epoch;
    }

    pub fn epoch_of(&self, height: Height) -> Epoch {
        params::epoch_of(&self.params, height)
    }

    pub fn epoch_start_height(&self, epoch: Epoch) -> Height {
        params::epoch_start_height(&self.params, epoch)
    }

    pub fn epoch_checkpoint_height(&self, epoch: Epoch) -> Height {
        params::epoch_checkpoint_height(&self.params, epoch)
    }

    /// Whether the block at this height is a justified checkpoint.
    pub fn is_justified_checkpoint(&self, height: Height) -> bool {
        let epoch = self.epoch_of(height);
        height == self.epoch_checkpoint_height(epoch)
            && self
                .data
                .checkpoints
                .get(epoch as usize)
                .is_some_and(|cp| cp.is_justified)
    }

    /// Whether the block at this height is a finalized checkpoint.
    pub fn is_finalized_checkpoint(&self, height: Height) -> bool {
        let epoch = self.epoch_of(height);
        height == self.epoch_checkpoint_height(epoch)
            && self
                .data
                .checkpoints
                .get(epoch as usize)
                .is_some_and(|cp| cp.is_finalized)
    }

    // ---- epoch transition -------------------------------------------------

    /// Prepares the state for a new epoch. Must be called with the
    /// height of the first block of the next epoch, in order.
    pub fn initialize_epoch(&mut self, height: Height) -> Result<(), ValidationError> {
        let new_epoch = self.data.current_epoch + 1;
        if height != params::epoch_start_height(&self.params, new_epoch) {
            return Err(ValidationError::InitWrongEpoch);
        }
        assert_eq!(
            self.data.checkpoints.len(),
            new_epoch as usize,
            "checkpoint vector out of sync with epochs"
        );
        self.data.checkpoints.push(Checkpoint::default());
        self.data.current_epoch = new_epoch;

        // Roll the deposit scale factor with the rescale derived from the
        // epoch that just ended, before recomputing the reward factor.
        let collective = self.collective_reward_factor();
        let voter_rescale = collective + Ufp64::ONE;
        let non_voter_rescale = voter_rescale.div(self.data.reward_factor + Ufp64::ONE);
        let rolled = non_voter_rescale.mul(self.deposit_scale_factor(new_epoch - 1));
        self.data.last_voter_rescale = voter_rescale;
        self.data.last_non_voter_rescale = non_voter_rescale;
        self.data.deposit_scale_factor.insert(new_epoch, rolled);
        let slashed = self.total_slashed(new_epoch - 1);
        self.data.total_slashed.insert(new_epoch, slashed);

        if self.deposit_exists() {
            let sqrt = self.sqrt_of_total_deposits();
            let esf = self.epochs_since_finalization();
            self.data.reward_factor = self.params.base_interest_factor.div(sqrt)
                + self.params.base_penalty_factor.mul_by_uint(esf as u64);
            if self.data.reward_factor.is_zero() {
                return Err(ValidationError::InitInvalidReward);
            }
        } else {
            self.insta_justify();
            self.data.reward_factor = Ufp64::ZERO;
        }

        self.increment_dynasty();
        self.data.expected_source_epoch = self.data.last_justified_epoch;

        debug!(
            epoch = new_epoch,
            dynasty = self.data.current_dynasty,
            justified = self.data.last_justified_epoch,
            finalized = self.data.last_finalized_epoch,
            "initialized epoch"
        );
        Ok(())
    }

    /// With nobody staked there is nobody to justify; the epoch whose
    /// voting window just closed is justified automatically.
    fn insta_justify(&mut self) {
        let epoch = self.data.current_epoch;
        if epoch < 2 {
            return;
        }
        let target = epoch - 2;
        self.checkpoint_mut(target).is_justified = true;
        if target > self.data.last_justified_epoch {
            self.data.last_justified_epoch = target;
        }
        if target >= 1 {
            let source = target - 1;
            if self.checkpoint(source).is_justified {
                self.checkpoint_mut(source).is_finalized = true;
                if source > self.data.last_finalized_epoch {
                    self.data.last_finalized_epoch = source;
                }
            }
        }
        trace!(target, "insta-justified checkpoint");
    }

    /// Advances the dynasty when the epoch before the previous voting
    /// window has been finalized, applying pending deposit deltas.
    fn increment_dynasty(&mut self) {
        let epoch = self.data.current_epoch;
        if epoch <= 2 || !self.checkpoint(epoch - 3).is_finalized {
            return;
        }
        let new_dynasty = self.data.current_dynasty + 1;
        self.data.current_dynasty = new_dynasty;
        self.data.total_prev_dyn_deposits = self.data.total_cur_dyn_deposits;
        let delta = self.data.dynasty_deltas.get(&new_dynasty).copied().unwrap_or(0);
        self.data.total_cur_dyn_deposits =
            (self.data.total_cur_dyn_deposits as i64 + delta) as u64;
        self.data.dynasty_start_epoch.insert(new_dynasty, epoch);
        trace!(dynasty = new_dynasty, epoch, "incremented dynasty");
    }

    fn deposit_exists(&self) -> bool {
        self.data.total_cur_dyn_deposits > 0 && self.data.total_prev_dyn_deposits > 0
    }

    fn epochs_since_finalization(&self) -> Epoch {
        self.data.current_epoch - self.data.last_finalized_epoch
    }

    fn sqrt_of_total_deposits(&self) -> Ufp64 {
        let scaled = self
            .data
            .total_cur_dyn_deposits
            .max(self.data.total_prev_dyn_deposits);
        let units = self.deposit_scale_factor(self.data.current_epoch).mul_to_uint(scaled)
            / UNIT as u64;
        Ufp64::sqrt_uint(1 + units)
    }

    /// Share of the reward factor earned collectively in the epoch that
    /// just ended, scaled by how much of the stake actually voted.
    fn collective_reward_factor(&self) -> Ufp64 {
        let epoch = self.data.current_epoch;
        let live = self.epochs_since_finalization() <= 2;
        if !self.deposit_exists() || !live {
            return Ufp64::ZERO;
        }
        let checkpoint = self.checkpoint(epoch - 1);
        let cur_votes = checkpoint.cur_dynasty_votes(self.data.expected_source_epoch);
        let prev_votes = checkpoint.prev_dynasty_votes(self.data.expected_source_epoch);
        let cur_fraction = Ufp64::div_2uints(cur_votes, self.data.total_cur_dyn_deposits);
        let prev_fraction = Ufp64::div_2uints(prev_votes, self.data.total_prev_dyn_deposits);
        cur_fraction
            .min(prev_fraction)
            .mul(self.data.reward_factor)
            .div_by_uint(2)
    }

    fn checkpoint(&self, epoch: Epoch) -> &Checkpoint {
        &self.data.checkpoints[epoch as usize]
    }

    fn checkpoint_mut(&mut self, epoch: Epoch) -> &mut Checkpoint {
        &mut self.data.checkpoints[epoch as usize]
    }

    fn deposit_scale_factor(&self, epoch: Epoch) -> Ufp64 {
        *self
            .data
            .deposit_scale_factor
            .get(&epoch)
            .expect("scale factor exists for every initialized epoch")
    }

    fn total_slashed(&self, epoch: Epoch) -> u64 {
        self.data.total_slashed.get(&epoch).copied().unwrap_or(0)
    }

    // ---- deposits ---------------------------------------------------------

    pub fn validate_deposit(
        &self,
        validator_address: &Buf20,
        deposit_value: Amount,
    ) -> Result<(), ValidationError> {
        if let Some(admin) = &self.data.admin {
            if admin.is_active() && !admin.is_whitelisted(validator_address) {
                return Err(ValidationError::AdminBlacklisted);
            }
        }
        if self.data.validators.contains_key(validator_address) {
            return Err(ValidationError::DepositDuplicate);
        }
        if deposit_value < self.params.min_deposit_size {
            return Err(ValidationError::DepositInsufficient);
        }
        Ok(())
    }

    pub fn process_deposit(&mut self, validator_address: &Buf20, deposit_value: Amount) {
        let scaled = self
            .deposit_scale_factor(self.data.current_epoch)
            .div_uint_by(deposit_value as u64);
        let start_dynasty = self.data.current_dynasty + 2;
        self.data.validators.insert(
            *validator_address,
            Validator::new(*validator_address, scaled, start_dynasty),
        );
        *self.data.dynasty_deltas.entry(start_dynasty).or_insert(0) += scaled as i64;
        debug!(
            validator = %validator_address,
            amount = deposit_value,
            start_dynasty,
            "processed deposit"
        );
    }

    // ---- votes ------------------------------------------------------------

    pub fn validate_vote(&self, vote: &Vote) -> Result<(), ValidationError> {
        let validator = self
            .data
            .validators
            .get(&vote.validator_address)
            .ok_or(ValidationError::VoteNotByValidator)?;
        if !self.is_finalizer_voting(validator) {
            return Err(ValidationError::VoteNotVotable);
        }
        let already_voted = self
            .data
            .checkpoints
            .get(vote.target_epoch as usize)
            .is_some_and(|cp| cp.voted.contains(&vote.validator_address));
        if already_voted {
            return Err(ValidationError::VoteAlreadyVoted);
        }
        if self.data.current_epoch == 0 || vote.target_epoch != self.data.current_epoch - 1 {
            return Err(ValidationError::VoteWrongTargetEpoch);
        }
        if vote.target_hash != self.data.recommended_target_hash {
            return Err(ValidationError::VoteWrongTargetHash);
        }
        let source_justified = self
            .data
            .checkpoints
            .get(vote.source_epoch as usize)
            .is_some_and(|cp| cp.is_justified);
        if !source_justified {
            return Err(ValidationError::VoteSrcEpochNotJustified);
        }
        Ok(())
    }

    pub fn process_vote(&mut self, vote: &Vote) {
        let target = vote.target_epoch;
        let source = vote.source_epoch;
        self.checkpoint_mut(target).voted.insert(vote.validator_address);

        let validator = self
            .data
            .validators
            .get(&vote.validator_address)
            .expect("vote was validated");
        let deposit = validator.deposit;
        let cur_dynasty = self.data.current_dynasty;
        let in_cur = validator.is_in_dynasty(cur_dynasty);
        let in_prev = cur_dynasty > 0 && validator.is_in_dynasty(cur_dynasty - 1);

        let checkpoint = self.checkpoint_mut(target);
        if in_cur {
            *checkpoint.cur_dynasty_votes.entry(source).or_insert(0) += deposit;
        }
        if in_prev {
            *checkpoint.prev_dynasty_votes.entry(source).or_insert(0) += deposit;
        }

        let reward = self.data.reward_factor.mul_to_uint(deposit);
        if reward > 0 {
            self.process_reward(&vote.validator_address, reward);
        }

        let checkpoint = self.checkpoint(target);
        let cur_votes = checkpoint.cur_dynasty_votes(source);
        let prev_votes = checkpoint.prev_dynasty_votes(source);
        let two_thirds_cur =
            cur_votes as u128 * 3 >= self.data.total_cur_dyn_deposits as u128 * 2;
        let two_thirds_prev =
            prev_votes as u128 * 3 >= self.data.total_prev_dyn_deposits as u128 * 2;

        if two_thirds_cur && two_thirds_prev && !self.checkpoint(target).is_justified {
            self.checkpoint_mut(target).is_justified = true;
            self.data.last_justified_epoch = target;
            debug!(epoch = target, "justified checkpoint");
            if target == source + 1 {
                self.checkpoint_mut(source).is_finalized = true;
                self.data.last_finalized_epoch = source;
                debug!(epoch = source, "finalized checkpoint");
            }
        }
    }

    /// Credits a vote reward to the finalizer's scaled deposit and the
    /// dynasty totals it currently counts towards.
    fn process_reward(&mut self, validator_address: &Buf20, reward: u64) {
        let cur_dynasty = self.data.current_dynasty;
        let validator = self
            .data
            .validators
            .get_mut(validator_address)
            .expect("rewarded finalizer exists");
        validator.deposit += reward;
        let end_dynasty = validator.end_dynasty;
        let in_cur = validator.is_in_dynasty(cur_dynasty);
        let in_prev = cur_dynasty > 0 && validator.is_in_dynasty(cur_dynasty - 1);
        if in_cur {
            self.data.total_cur_dyn_deposits += reward;
        }
        if in_prev {
            self.data.total_prev_dyn_deposits += reward;
        }
        if end_dynasty < DEFAULT_END_DYNASTY {
            // The scheduled removal at logout must match the grown deposit.
            *self.data.dynasty_deltas.entry(end_dynasty).or_insert(0) -= reward as i64;
        }
    }

    // ---- logout -----------------------------------------------------------

    pub fn validate_logout(&self, validator_address: &Buf20) -> Result<(), ValidationError> {
        let validator = self
            .data
            .validators
            .get(validator_address)
            .ok_or(ValidationError::LogoutNotAValidator)?;
        if validator.start_dynasty > self.data.current_dynasty {
            return Err(ValidationError::LogoutNotYetAValidator);
        }
        if validator.has_logged_out() {
            return Err(ValidationError::LogoutAlreadyDone);
        }
        Ok(())
    }

    pub fn process_logout(&mut self, validator_address: &Buf20) {
        let end_dynasty = self.data.current_dynasty + self.params.dynasty_logout_delay;
        let validator = self
            .data
            .validators
            .get_mut(validator_address)
            .expect("logout was validated");
        validator.end_dynasty = end_dynasty;
        let deposit = validator.deposit;
        *self.data.dynasty_deltas.entry(end_dynasty).or_insert(0) -= deposit as i64;
        debug!(validator = %validator_address, end_dynasty, "processed logout");
    }

    // ---- withdraw ---------------------------------------------------------

    /// First epoch the finalizer's deposit may be withdrawn, known once
    /// its end dynasty has passed.
    pub fn withdraw_epoch(&self, validator: &Validator) -> Option<Epoch> {
        let after_end = validator.end_dynasty.checked_add(1)?;
        let end_epoch = self.data.dynasty_start_epoch.get(&after_end)?;
        Some(end_epoch + self.params.withdrawal_epoch_delay)
    }

    pub fn validate_withdraw(
        &self,
        validator_address: &Buf20,
        requested_amount: Amount,
    ) -> Result<(), ValidationError> {
        let amount = self.calculate_withdraw_amount(validator_address)?;
        if requested_amount > amount {
            return Err(ValidationError::WithdrawWrongAmount);
        }
        Ok(())
    }

    pub fn calculate_withdraw_amount(
        &self,
        validator_address: &Buf20,
    ) -> Result<Amount, ValidationError> {
        let validator = self
            .data
            .validators
            .get(validator_address)
            .ok_or(ValidationError::WithdrawNotAValidator)?;
        if self.data.current_dynasty <= validator.end_dynasty {
            return Err(ValidationError::WithdrawTooEarly);
        }
        let withdraw_epoch = self
            .withdraw_epoch(validator)
            .ok_or(ValidationError::WithdrawTooEarly)?;
        if self.data.current_epoch < withdraw_epoch {
            return Err(ValidationError::WithdrawTooEarly);
        }
        let end_epoch = *self
            .data
            .dynasty_start_epoch
            .get(&(validator.end_dynasty + 1))
            .expect("end epoch known past the end dynasty");
        let mut amount = self
            .deposit_scale_factor(end_epoch)
            .mul_to_uint(validator.deposit);
        if validator.is_slashed {
            let base_epoch = end_epoch.saturating_sub(2 * self.params.withdrawal_epoch_delay);
            let recently_slashed = self.total_slashed(end_epoch) - self.total_slashed(base_epoch);
            let total_effective = self
                .deposit_scale_factor(self.data.current_epoch)
                .mul_to_uint(self.data.total_cur_dyn_deposits)
                .max(1);
            let fraction = Ufp64::div_2uints(
                recently_slashed.saturating_mul(self.params.slash_fraction_multiplier as u64),
                total_effective,
            )
            .min(Ufp64::ONE);
            amount -= fraction.mul_to_uint(amount);
        }
        Ok(amount as Amount)
    }

    pub fn process_withdraw(&mut self, validator_address: &Buf20) {
        self.data.validators.remove(validator_address);
        debug!(validator = %validator_address, "processed withdraw");
    }

    // ---- slashing ---------------------------------------------------------

    /// Whether two votes prove a slashable offence by one finalizer.
    pub fn is_slashable(&self, vote1: &Vote, vote2: &Vote) -> Result<(), ValidationError> {
        let validator = self
            .data
            .validators
            .get(&vote1.validator_address)
            .ok_or(ValidationError::SlashNotAValidator)?;
        if !self.data.validators.contains_key(&vote2.validator_address) {
            return Err(ValidationError::SlashNotAValidator);
        }
        if vote1.validator_address != vote2.validator_address {
            return Err(ValidationError::SlashNotSameValidator);
        }
        if vote1.target_epoch > self.data.current_epoch
            || vote2.target_epoch > self.data.current_epoch
        {
            return Err(ValidationError::SlashTooEarly);
        }
        if validator.is_slashed {
            return Err(ValidationError::SlashAlreadySlashed);
        }
        if vote1 == vote2 {
            return Err(ValidationError::SlashSameVote);
        }
        if vote1.is_double_vote(vote2) || vote1.is_surround_vote(vote2) {
            Ok(())
        } else {
            Err(ValidationError::SlashNotValid)
        }
    }

    /// Burns the offender's deposit. Returns the bounty owed to the
    /// reporter, which the slash transaction may mint for itself.
    pub fn process_slash(&mut self, vote1: &Vote, _vote2: &Vote) -> Amount {
        let address = vote1.validator_address;
        let effective = self.deposit_size(&address);
        *self
            .data
            .total_slashed
            .entry(self.data.current_epoch)
            .or_insert(0) += effective as u64;

        let current_dynasty = self.data.current_dynasty;
        let validator = self
            .data
            .validators
            .get_mut(&address)
            .expect("slash was validated");
        validator.is_slashed = true;
        let deposit = validator.deposit;
        let end_dynasty = validator.end_dynasty;

        // Withdraw the offender from all dynasties it has not reached yet.
        if current_dynasty < end_dynasty {
            validator.end_dynasty = current_dynasty + 1;
            *self
                .data
                .dynasty_deltas
                .entry(current_dynasty + 1)
                .or_insert(0) -= deposit as i64;
            if end_dynasty < DEFAULT_END_DYNASTY {
                // Cancel the removal scheduled by an earlier logout.
                *self.data.dynasty_deltas.entry(end_dynasty).or_insert(0) += deposit as i64;
            }
        }

        let bounty = effective / self.params.bounty_fraction_denominator as Amount;
        warn!(validator = %address, burned = effective, bounty, "slashed finalizer");
        bounty
    }

    // ---- admin commands ---------------------------------------------------

    pub fn is_permissioning_active(&self) -> bool {
        self.data.admin.as_ref().is_some_and(AdminState::is_active)
    }

    /// Checks a signing quorum against the current admin key set.
    pub fn validate_admin_keys(&self, signing_keys: &[AdminKey]) -> Result<(), ValidationError> {
        let admin = self
            .data
            .admin
            .as_ref()
            .filter(|a| a.is_active())
            .ok_or(ValidationError::AdminNotAuthorized)?;
        let quorum_ok = signing_keys.len() >= 2
            && signing_keys.iter().all(|k| admin.is_admin_key(k))
            && signing_keys
                .iter()
                .enumerate()
                .all(|(i, k)| !signing_keys[..i].contains(k));
        if quorum_ok {
            Ok(())
        } else {
            Err(ValidationError::AdminNotAuthorized)
        }
    }

    pub fn process_admin_commands(&mut self, commands: &[AdminCommand]) {
        let admin = self
            .data
            .admin
            .as_mut()
            .expect("admin commands were validated");
        for command in commands {
            match command {
                AdminCommand::AddToWhitelist(addresses) => {
                    admin.white_list.extend(addresses.iter().copied());
                }
                AdminCommand::RemoveFromWhitelist(addresses) => {
                    for address in addresses {
                        admin.white_list.remove(address);
                    }
                }
                AdminCommand::ResetAdmins(keys) => {
                    admin.admin_keys = *keys;
                }
                AdminCommand::EndPermissioning => {
                    admin.permissioning_ended = true;
                }
            }
        }
        debug!(count = commands.len(), "processed admin commands");
    }

    // ---- block drivers ----------------------------------------------------

    /// Advances the state by one full block.
    pub fn process_new_tip(&mut self, block_index: &BlockIndex, block: &Block) {
        trace!(height = block_index.height, hash = %block_index.block_hash, "processing tip");
        self.begin_block(block_index);
        for tx in &block.vtx {
            if tx.is_finalization() {
                self.process_commit_tx(tx);
            }
        }
        self.status = InitStatus::Completed;
    }

    /// Advances the state from finalizer commits alone (no full block
    /// data available yet).
    pub fn process_new_commits(&mut self, block_index: &BlockIndex, txs: &[Transaction]) {
        trace!(height = block_index.height, hash = %block_index.block_hash, "processing commits");
        self.begin_block(block_index);
        for tx in txs {
            if tx.is_finalization() {
                self.process_commit_tx(tx);
            }
        }
        self.status = InitStatus::FromCommits;
    }

    fn begin_block(&mut self, block_index: &BlockIndex) {
        if params::is_epoch_start(&self.params, block_index.height) {
            self.initialize_epoch(block_index.height)
                .unwrap_or_else(|err| {
                    panic!(
                        "blocks must be processed in order: height {} rejected: {err}",
                        block_index.height
                    )
                });
            // Votes of the new epoch target this block's parent, the
            // checkpoint of the epoch that just ended.
            let target = block_index
                .prev_hash
                .expect("an epoch start block has a parent");
            self.set_recommended_target(target, self.data.current_epoch - 1);
        }
    }

    /// Applies one finalization transaction. The surrounding block was
    /// accepted by full validation, so a rejection here is a broken
    /// contract, not a recoverable condition.
    fn process_commit_tx(&mut self, tx: &Transaction) {
        let txid = tx.txid();
        let payload = tx
            .payload
            .as_ref()
            .filter(|_| tx.payload_matches_type())
            .unwrap_or_else(|| panic!("malformed finalization transaction {txid} in block"));
        let check = |res: Result<(), ValidationError>| {
            if let Err(err) = res {
                panic!("invalid finalization transaction {txid} in connected block: {err}");
            }
        };
        match payload {
            TxPayload::Deposit { validator_address } => {
                let amount = tx.vout.first().map(|o| o.value).unwrap_or(0);
                check(self.validate_deposit(validator_address, amount));
                self.process_deposit(validator_address, amount);
                self.register_last_tx(validator_address, txid);
            }
            TxPayload::Vote(vote) => {
                check(self.validate_vote(vote));
                self.process_vote(vote);
                self.register_last_tx(&vote.validator_address, txid);
            }
            TxPayload::Logout { validator_address } => {
                check(self.validate_logout(validator_address));
                self.process_logout(validator_address);
                self.register_last_tx(validator_address, txid);
            }
            TxPayload::Slash { vote1, vote2 } => {
                check(self.is_slashable(vote1, vote2));
                self.process_slash(vote1, vote2);
                self.register_last_tx(&vote1.validator_address, txid);
            }
            TxPayload::Withdraw {
                validator_address,
                amount,
            } => {
                check(self.validate_withdraw(validator_address, *amount));
                self.process_withdraw(validator_address);
            }
            TxPayload::Admin {
                signing_keys,
                commands,
            } => {
                check(self.validate_admin_keys(signing_keys));
                self.process_admin_commands(commands);
            }
        }
    }

    fn register_last_tx(&mut self, validator_address: &Buf20, txid: Buf32) {
        if let Some(validator) = self.data.validators.get_mut(validator_address) {
            validator.last_transaction_hash = txid;
        }
    }

    // ---- persistence ------------------------------------------------------

    /// Versioned encoding for the state database.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![STATE_ENCODING_VERSION];
        self.data
            .serialize(&mut out)
            .expect("state encoding is infallible");
        (self.status as u8)
            .serialize(&mut out)
            .expect("state encoding is infallible");
        out
    }

    pub fn decode(params: Arc<Parameters>, bytes: &[u8]) -> std::io::Result<FinalizationState> {
        let bad = |msg: &str| std::io::Error::new(std::io::ErrorKind::InvalidData, msg);
        let (&version, rest) = bytes.split_first().ok_or_else(|| bad("empty state"))?;
        if version != STATE_ENCODING_VERSION {
            return Err(bad("unknown state encoding version"));
        }
        let mut reader = rest;
        let data = FinalizationStateData::deserialize_reader(&mut reader)?;
        let status_tag = u8::deserialize_reader(&mut reader)?;
        let status = InitStatus::from_u8(status_tag).ok_or_else(|| bad("unknown init status"))?;
        if !reader.is_empty() {
            return Err(bad("trailing bytes after state"));
        }
        Ok(FinalizationState {
            params,
            data,
            status,
        })
    }

    pub fn set_status(&mut self, status: InitStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_epoch_length(epoch_length: u32) -> Arc<Parameters> {
        let mut p = Parameters::reg_test();
        p.epoch_length = epoch_length;
        Arc::new(p)
    }

    fn addr(n: u8) -> Buf20 {
        Buf20::new([n; 20])
    }

    fn target(n: u8) -> Buf32 {
        Buf32::new([n; 32])
    }

    /// Steps through whole epochs by driving initialize_epoch directly.
    fn run_epochs(state: &mut FinalizationState, count: u32) {
        for _ in 0..count {
            let next = state.current_epoch() + 1;
            let height = state.epoch_start_height(next);
            state.initialize_epoch(height).unwrap();
        }
    }

    /// Deposits and runs epochs until the finalizer's dynasty is live.
    fn create_and_activate_deposit(state: &mut FinalizationState, address: Buf20, amount: Amount) {
        state.validate_deposit(&address, amount).unwrap();
        state.process_deposit(&address, amount);
        run_epochs(state, 4);
        assert!(state
            .validator(&address)
            .unwrap()
            .is_in_dynasty(state.current_dynasty()));
    }

    #[test]
    fn test_constructor() {
        let state = FinalizationState::genesis(params_with_epoch_length(50));
        assert_eq!(state.current_epoch(), 0);
        assert_eq!(state.current_dynasty(), 0);
        assert_eq!(state.last_justified_epoch(), 0);
        assert_eq!(state.last_finalized_epoch(), 0);
        assert_eq!(state.init_status(), InitStatus::Completed);
    }

    #[test]
    fn test_initialize_epoch_wrong_height() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        assert_eq!(
            state.initialize_epoch(100),
            Err(ValidationError::InitWrongEpoch)
        );
        assert_eq!(
            state.initialize_epoch(49),
            Err(ValidationError::InitWrongEpoch)
        );
        assert_eq!(
            state.initialize_epoch(0),
            Err(ValidationError::InitWrongEpoch)
        );
        assert_eq!(state.current_epoch(), 0);
    }

    #[test]
    fn test_insta_justification_cadence() {
        // Empty finalizer set, epoch length 50: after driving heights
        // 1, 51, 101 and 151 the state sits at epoch 4 with epoch 2
        // justified and epoch 1 finalized.
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        for height in [1, 51, 101, 151] {
            state.initialize_epoch(height).unwrap();
        }
        assert_eq!(state.current_epoch(), 4);
        assert_eq!(state.last_justified_epoch(), 2);
        assert_eq!(state.last_finalized_epoch(), 1);
        // Dynasties trail by two epochs once finalization is rolling.
        assert_eq!(state.current_dynasty(), 2);
    }

    #[test]
    fn test_reward_factor_shrinks_with_more_stake() {
        let params = params_with_epoch_length(50);
        let mut small = FinalizationState::genesis(params.clone());
        small.process_deposit(&addr(1), 2_000 * UNIT);
        run_epochs(&mut small, 5);

        let mut large = FinalizationState::genesis(params);
        large.process_deposit(&addr(1), 200_000 * UNIT);
        run_epochs(&mut large, 5);

        assert!(small.data.reward_factor > large.data.reward_factor);
        assert!(!large.data.reward_factor.is_zero());
    }

    #[test]
    fn test_deposit_size_tracks_deposit() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let amount = 3_000 * UNIT;
        state.validate_deposit(&addr(1), amount).unwrap();
        state.process_deposit(&addr(1), amount);
        assert_eq!(state.deposit_size(&addr(1)), amount);
    }

    #[test]
    fn test_validate_deposit_rejections() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        assert_eq!(
            state.validate_deposit(&addr(1), min - 1),
            Err(ValidationError::DepositInsufficient)
        );
        state.process_deposit(&addr(1), min);
        assert_eq!(
            state.validate_deposit(&addr(1), min),
            Err(ValidationError::DepositDuplicate)
        );
    }

    #[test]
    fn test_vote_not_votable_until_dynasty_starts() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        let hash = target(7);
        state.set_recommended_target(hash, 0);
        run_epochs(&mut state, 1);
        state.validate_deposit(&addr(1), min).unwrap();
        state.process_deposit(&addr(1), min);

        // e1/d0: not yet active.
        let vote = Vote {
            validator_address: addr(1),
            target_hash: hash,
            source_epoch: 0,
            target_epoch: 0,
        };
        assert_eq!(
            state.validate_vote(&vote),
            Err(ValidationError::VoteNotVotable)
        );

        // e2/d0 and e3/d1: still waiting for the start dynasty.
        run_epochs(&mut state, 1);
        let vote = Vote {
            validator_address: addr(1),
            target_hash: hash,
            source_epoch: 0,
            target_epoch: 1,
        };
        assert_eq!(
            state.validate_vote(&vote),
            Err(ValidationError::VoteNotVotable)
        );
        run_epochs(&mut state, 1);
        assert_eq!(state.current_dynasty(), 1);
        let vote = Vote {
            validator_address: addr(1),
            target_hash: hash,
            source_epoch: 1,
            target_epoch: 2,
        };
        assert_eq!(
            state.validate_vote(&vote),
            Err(ValidationError::VoteNotVotable)
        );

        // e4/d2: the start dynasty arrived.
        run_epochs(&mut state, 1);
        assert_eq!(state.current_dynasty(), 2);
        let vote = Vote {
            validator_address: addr(1),
            target_hash: hash,
            source_epoch: 2,
            target_epoch: 3,
        };
        state.validate_vote(&vote).unwrap();
    }

    #[test]
    fn test_vote_rejections_in_order() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        let hash = target(7);
        state.set_recommended_target(hash, 0);
        create_and_activate_deposit(&mut state, addr(1), min);

        let good = Vote {
            validator_address: addr(1),
            target_hash: hash,
            source_epoch: 2,
            target_epoch: 3,
        };
        state.validate_vote(&good).unwrap();

        // Unknown validator.
        let mut vote = good;
        vote.validator_address = addr(9);
        assert_eq!(
            state.validate_vote(&vote),
            Err(ValidationError::VoteNotByValidator)
        );

        // Wrong target epoch, both sides.
        let mut vote = good;
        vote.target_epoch = 2;
        assert_eq!(
            state.validate_vote(&vote),
            Err(ValidationError::VoteWrongTargetEpoch)
        );
        vote.target_epoch = 4;
        assert_eq!(
            state.validate_vote(&vote),
            Err(ValidationError::VoteWrongTargetEpoch)
        );

        // Wrong target hash.
        let mut vote = good;
        vote.target_hash = target(8);
        assert_eq!(
            state.validate_vote(&vote),
            Err(ValidationError::VoteWrongTargetHash)
        );

        // Source not justified.
        let mut vote = good;
        vote.source_epoch = 3;
        assert_eq!(
            state.validate_vote(&vote),
            Err(ValidationError::VoteSrcEpochNotJustified)
        );

        // Already voted.
        state.process_vote(&good);
        assert_eq!(
            state.validate_vote(&good),
            Err(ValidationError::VoteAlreadyVoted)
        );
    }

    #[test]
    fn test_minority_vote_does_not_justify() {
        // V1 holds a third of the stake; alone it cannot justify.
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        let hash = target(7);
        state.set_recommended_target(hash, 0);
        state.process_deposit(&addr(1), min);
        state.process_deposit(&addr(2), 2 * min);
        run_epochs(&mut state, 4);

        let vote = Vote {
            validator_address: addr(1),
            target_hash: hash,
            source_epoch: 2,
            target_epoch: 3,
        };
        state.validate_vote(&vote).unwrap();
        state.process_vote(&vote);
        assert!(!state.checkpoint(3).is_justified);
        assert!(!state.checkpoint(3).is_finalized);
    }

    #[test]
    fn test_majority_votes_justify_then_finalize() {
        // V2 holds three quarters of the stake. Its vote justifies the
        // target; the follow-up vote with an adjacent source finalizes
        // that source.
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        let hash = target(7);
        state.set_recommended_target(hash, 0);
        state.process_deposit(&addr(1), min);
        state.process_deposit(&addr(2), 3 * min);
        run_epochs(&mut state, 5);
        assert_eq!(state.current_epoch(), 5);

        let vote = Vote {
            validator_address: addr(2),
            target_hash: hash,
            source_epoch: 2,
            target_epoch: 4,
        };
        state.validate_vote(&vote).unwrap();
        state.process_vote(&vote);
        assert!(state.checkpoint(4).is_justified);
        assert!(!state.checkpoint(4).is_finalized);

        run_epochs(&mut state, 1);
        let hash2 = target(8);
        state.set_recommended_target(hash2, 5);
        let vote = Vote {
            validator_address: addr(2),
            target_hash: hash2,
            source_epoch: 4,
            target_epoch: 5,
        };
        state.validate_vote(&vote).unwrap();
        state.process_vote(&vote);
        assert!(state.checkpoint(5).is_justified);
        assert!(state.checkpoint(4).is_finalized);
        assert_eq!(state.last_justified_epoch(), 5);
        assert_eq!(state.last_finalized_epoch(), 4);
    }

    #[test]
    fn test_voting_reward_grows_deposit() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        let hash = target(7);
        state.set_recommended_target(hash, 0);
        state.process_deposit(&addr(1), 4 * min);
        run_epochs(&mut state, 5);
        // Reach an epoch where deposits exist so the reward factor is
        // non-zero.
        run_epochs(&mut state, 1);
        assert!(!state.data.reward_factor.is_zero());

        let before = state.validator(&addr(1)).unwrap().deposit;
        let vote = state.recommended_vote(&addr(1));
        state.validate_vote(&vote).unwrap();
        state.process_vote(&vote);
        let after = state.validator(&addr(1)).unwrap().deposit;
        assert!(after > before);
    }

    #[test]
    fn test_logout_lifecycle() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        assert_eq!(
            state.validate_logout(&addr(1)),
            Err(ValidationError::LogoutNotAValidator)
        );
        state.process_deposit(&addr(1), min);
        assert_eq!(
            state.validate_logout(&addr(1)),
            Err(ValidationError::LogoutNotYetAValidator)
        );
        run_epochs(&mut state, 4);
        state.validate_logout(&addr(1)).unwrap();
        state.process_logout(&addr(1));
        let expected_end = state.current_dynasty() + state.parameters().dynasty_logout_delay;
        assert_eq!(state.validator(&addr(1)).unwrap().end_dynasty, expected_end);
        assert_eq!(
            state.validate_logout(&addr(1)),
            Err(ValidationError::LogoutAlreadyDone)
        );
    }

    #[test]
    fn test_withdraw_too_early_then_allowed() {
        // Regtest delays are short: logout delay 2, withdrawal delay 5.
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        let amount = 2 * min;
        state.process_deposit(&addr(1), amount);
        run_epochs(&mut state, 4);
        state.process_logout(&addr(1));
        let end_dynasty = state.validator(&addr(1)).unwrap().end_dynasty;
        assert_eq!(
            state.calculate_withdraw_amount(&addr(1)),
            Err(ValidationError::WithdrawTooEarly)
        );

        // Dynasties only advance while checkpoints finalize, so the
        // finalizer keeps voting on its way out.
        for _ in 0..3 {
            let vote = state.recommended_vote(&addr(1));
            state.validate_vote(&vote).unwrap();
            state.process_vote(&vote);
            run_epochs(&mut state, 1);
        }
        assert!(state.current_dynasty() > end_dynasty);

        let withdraw_epoch = state
            .withdraw_epoch(state.validator(&addr(1)).unwrap())
            .unwrap();
        assert_eq!(
            state.calculate_withdraw_amount(&addr(1)),
            Err(ValidationError::WithdrawTooEarly)
        );
        let epochs_to_run = withdraw_epoch - state.current_epoch();
        run_epochs(&mut state, epochs_to_run);

        let withdrawable = state.calculate_withdraw_amount(&addr(1)).unwrap();
        assert!(withdrawable > 0);
        state.validate_withdraw(&addr(1), withdrawable).unwrap();
        assert_eq!(
            state.validate_withdraw(&addr(1), withdrawable + 1),
            Err(ValidationError::WithdrawWrongAmount)
        );
        state.process_withdraw(&addr(1));
        assert!(state.validator(&addr(1)).is_none());
        assert_eq!(
            state.calculate_withdraw_amount(&addr(1)),
            Err(ValidationError::WithdrawNotAValidator)
        );
    }

    #[test]
    fn test_is_slashable_rejections() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        let v1 = Vote {
            validator_address: addr(1),
            target_hash: target(5),
            source_epoch: 3,
            target_epoch: 5,
        };
        let v2 = Vote {
            validator_address: addr(1),
            target_hash: target(6),
            source_epoch: 12,
            target_epoch: 52,
        };

        assert_eq!(
            state.is_slashable(&v1, &v2),
            Err(ValidationError::SlashNotAValidator)
        );
        state.process_deposit(&addr(1), min);
        state.process_deposit(&addr(2), min + 1);
        run_epochs(&mut state, 1);

        let other = Vote {
            validator_address: addr(2),
            target_hash: target(6),
            source_epoch: 12,
            target_epoch: 52,
        };
        assert_eq!(
            state.is_slashable(&v1, &other),
            Err(ValidationError::SlashNotSameValidator)
        );
        // The second vote's target is far in the future.
        assert_eq!(
            state.is_slashable(&v2, &v1),
            Err(ValidationError::SlashTooEarly)
        );

        run_epochs(&mut state, 5);
        assert_eq!(
            state.is_slashable(&v1, &v1),
            Err(ValidationError::SlashSameVote)
        );
        // Disjoint spans, different targets: no offence.
        let disjoint = Vote {
            validator_address: addr(1),
            target_hash: target(9),
            source_epoch: 5,
            target_epoch: 6,
        };
        assert_eq!(
            state.is_slashable(&v1, &disjoint),
            Err(ValidationError::SlashNotValid)
        );
    }

    #[test]
    fn test_process_slash_burns_deposit() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        create_and_activate_deposit(&mut state, addr(1), min);
        run_epochs(&mut state, 2);

        let v1 = Vote {
            validator_address: addr(1),
            target_hash: target(5),
            source_epoch: 3,
            target_epoch: 5,
        };
        let v2 = Vote {
            validator_address: addr(1),
            target_hash: target(6),
            source_epoch: 3,
            target_epoch: 5,
        };
        state.is_slashable(&v1, &v2).unwrap();
        let bounty = state.process_slash(&v1, &v2);
        assert!(bounty > 0);
        assert_eq!(state.deposit_size(&addr(1)), 0);
        assert_eq!(
            state.is_slashable(&v1, &v2),
            Err(ValidationError::SlashAlreadySlashed)
        );
    }

    #[test]
    fn test_surround_slash_burns_deposit() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        create_and_activate_deposit(&mut state, addr(1), min);
        run_epochs(&mut state, 2);

        let outer = Vote {
            validator_address: addr(1),
            target_hash: target(5),
            source_epoch: 1,
            target_epoch: 5,
        };
        let inner = Vote {
            validator_address: addr(1),
            target_hash: target(4),
            source_epoch: 3,
            target_epoch: 4,
        };
        state.is_slashable(&outer, &inner).unwrap();
        state.process_slash(&outer, &inner);
        assert_eq!(state.deposit_size(&addr(1)), 0);
    }

    #[test]
    fn test_recommended_vote() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        run_epochs(&mut state, 7);
        let hash = target(3);
        state.set_recommended_target(hash, 6);
        // Insta-justification trails the current epoch by two.
        assert_eq!(state.expected_source_epoch(), 5);
        let vote = state.recommended_vote(&addr(1));
        assert_eq!(vote.validator_address, addr(1));
        assert_eq!(vote.target_hash, hash);
        assert_eq!(vote.target_epoch, 6);
        assert_eq!(vote.source_epoch, 5);
    }

    #[test]
    fn test_admin_permissioning() {
        let mut p = Parameters::reg_test();
        p.epoch_length = 50;
        let keys = [[1u8; 33], [2u8; 33], [3u8; 33]];
        p.admin_keys = Some(keys);
        let mut state = FinalizationState::genesis(Arc::new(p));
        let min = state.parameters().min_deposit_size;

        assert!(state.is_permissioning_active());
        assert_eq!(
            state.validate_deposit(&addr(1), min),
            Err(ValidationError::AdminBlacklisted)
        );

        assert_eq!(
            state.validate_admin_keys(&[[1u8; 33]]),
            Err(ValidationError::AdminNotAuthorized)
        );
        assert_eq!(
            state.validate_admin_keys(&[[1u8; 33], [9u8; 33]]),
            Err(ValidationError::AdminNotAuthorized)
        );
        state.validate_admin_keys(&[[1u8; 33], [3u8; 33]]).unwrap();

        state.process_admin_commands(&[AdminCommand::AddToWhitelist(vec![addr(1)])]);
        state.validate_deposit(&addr(1), min).unwrap();

        state.process_admin_commands(&[AdminCommand::EndPermissioning]);
        assert!(!state.is_permissioning_active());
        state.validate_deposit(&addr(2), min).unwrap();
        assert_eq!(
            state.validate_admin_keys(&[[1u8; 33], [3u8; 33]]),
            Err(ValidationError::AdminNotAuthorized)
        );
    }

    #[test]
    fn test_process_new_tip_registers_last_tx_and_status() {
        use unite_state::transaction::{TxOut, TxType};

        let params = params_with_epoch_length(50);
        let genesis = FinalizationState::genesis(params.clone());
        let mut state = FinalizationState::from_parent(&genesis);
        assert_eq!(state.init_status(), InitStatus::New);

        let mut deposit_tx = Transaction::new(TxType::Deposit);
        deposit_tx.payload = Some(TxPayload::Deposit {
            validator_address: addr(1),
        });
        deposit_tx.vout.push(TxOut::new(
            params.min_deposit_size,
            unite_state::script::Script::empty(),
        ));

        let index = BlockIndex {
            block_hash: target(1),
            prev_hash: Some(Buf32::zero()),
            height: 1,
            time: 0,
            bits: 0x207fffff,
            stake_modifier: Buf32::zero(),
            has_block_data: true,
        };
        let block = Block {
            vtx: vec![deposit_tx.clone()],
            ..Block::default()
        };
        state.process_new_tip(&index, &block);
        assert_eq!(state.init_status(), InitStatus::Completed);
        assert_eq!(state.current_epoch(), 1);
        assert_eq!(state.last_tx_hash(&addr(1)), Some(deposit_tx.txid()));
        // The recommended target is the parent of the epoch start block.
        assert_eq!(state.data.recommended_target_hash, Buf32::zero());

        // The commits-only driver produces an equal state, modulo status.
        let mut from_commits = FinalizationState::from_parent(&genesis);
        from_commits.process_new_commits(&index, &[deposit_tx]);
        assert_eq!(from_commits.init_status(), InitStatus::FromCommits);
        assert_eq!(from_commits.data, state.data);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let params = params_with_epoch_length(50);
        let mut state = FinalizationState::genesis(params.clone());
        state.process_deposit(&addr(1), 2_000 * UNIT);
        run_epochs(&mut state, 6);
        let encoded = state.encode();
        assert_eq!(encoded[0], STATE_ENCODING_VERSION);
        let decoded = FinalizationState::decode(params.clone(), &encoded).unwrap();
        assert_eq!(decoded, state);
        // Unknown versions must not decode.
        let mut bad = encoded.clone();
        bad[0] = 99;
        assert!(FinalizationState::decode(params, &bad).is_err());
    }

    #[test]
    fn test_validate_is_side_effect_free_and_idempotent() {
        let mut state = FinalizationState::genesis(params_with_epoch_length(50));
        let min = state.parameters().min_deposit_size;
        let hash = target(7);
        state.set_recommended_target(hash, 0);
        create_and_activate_deposit(&mut state, addr(1), min);
        let snapshot = state.clone();

        let vote = Vote {
            validator_address: addr(1),
            target_hash: hash,
            source_epoch: 2,
            target_epoch: 3,
        };
        let first = state.validate_vote(&vote);
        let second = state.validate_vote(&vote);
        assert_eq!(first, second);
        let _ = state.validate_deposit(&addr(2), min);
        let _ = state.validate_logout(&addr(1));
        let _ = state.calculate_withdraw_amount(&addr(1));
        assert_eq!(state, snapshot);
    }

    #[test]
    fn test_justification_ordering_invariant() {
        // I1 holds at every reachable step of a long insta-justified run.
        let mut state = FinalizationState::genesis(params_with_epoch_length(5));
        for _ in 0..20 {
            run_epochs(&mut state, 1);
            assert!(state.last_finalized_epoch() <= state.last_justified_epoch());
            assert!(state.last_justified_epoch() <= state.current_epoch());
        }
    }
}
