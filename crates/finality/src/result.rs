//! Validation verdicts of the finalization state machine.

use std::str::FromStr;

use thiserror::Error;

/// Reasons a finalization transaction or epoch transition is rejected.
///
/// These are data, not failures: `validate_*` returns them without side
/// effects and callers translate them into wire rejection reasons.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Error)]
pub enum ValidationError {
    #[error("init-wrong-epoch")]
    InitWrongEpoch,
    #[error("init-invalid-reward")]
    InitInvalidReward,

    #[error("deposit-insufficient")]
    DepositInsufficient,
    #[error("deposit-duplicate")]
    DepositDuplicate,

    #[error("vote-malformed")]
    VoteMalformed,
    #[error("vote-not-by-validator")]
    VoteNotByValidator,
    #[error("vote-not-votable")]
    VoteNotVotable,
    #[error("vote-already-voted")]
    VoteAlreadyVoted,
    #[error("vote-wrong-target-hash")]
    VoteWrongTargetHash,
    #[error("vote-wrong-target-epoch")]
    VoteWrongTargetEpoch,
    #[error("vote-src-epoch-not-justified")]
    VoteSrcEpochNotJustified,

    #[error("logout-already-done")]
    LogoutAlreadyDone,
    #[error("logout-not-a-validator")]
    LogoutNotAValidator,
    #[error("logout-not-yet-a-validator")]
    LogoutNotYetAValidator,

    #[error("withdraw-too-early")]
    WithdrawTooEarly,
    #[error("withdraw-not-a-validator")]
    WithdrawNotAValidator,
    #[error("withdraw-wrong-amount")]
    WithdrawWrongAmount,

    #[error("slash-same-vote")]
    SlashSameVote,
    #[error("slash-not-same-validator")]
    SlashNotSameValidator,
    #[error("slash-too-early")]
    SlashTooEarly,
    #[error("slash-already-slashed")]
    SlashAlreadySlashed,
    #[error("slash-not-valid")]
    SlashNotValid,
    #[error("slash-not-a-validator")]
    SlashNotAValidator,

    #[error("admin-blacklisted")]
    AdminBlacklisted,
    #[error("admin-not-authorized")]
    AdminNotAuthorized,
}

impl FromStr for ValidationError {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ValidationError::*;
        Ok(match s {
            "init-wrong-epoch" => InitWrongEpoch,
            "init-invalid-reward" => InitInvalidReward,
            "deposit-insufficient" => DepositInsufficient,
            "deposit-duplicate" => DepositDuplicate,
            "vote-malformed" => VoteMalformed,
            "vote-not-by-validator" => VoteNotByValidator,
            "vote-not-votable" => VoteNotVotable,
            "vote-already-voted" => VoteAlreadyVoted,
            "vote-wrong-target-hash" => VoteWrongTargetHash,
            "vote-wrong-target-epoch" => VoteWrongTargetEpoch,
            "vote-src-epoch-not-justified" => VoteSrcEpochNotJustified,
            "logout-already-done" => LogoutAlreadyDone,
            "logout-not-a-validator" => LogoutNotAValidator,
            "logout-not-yet-a-validator" => LogoutNotYetAValidator,
            "withdraw-too-early" => WithdrawTooEarly,
            "withdraw-not-a-validator" => WithdrawNotAValidator,
            "withdraw-wrong-amount" => WithdrawWrongAmount,
            "slash-same-vote" => SlashSameVote,
            "slash-not-same-validator" => SlashNotSameValidator,
            "slash-too-early" => SlashTooEarly,
            "slash-already-slashed" => SlashAlreadySlashed,
            "slash-not-valid" => SlashNotValid,
            "slash-not-a-validator" => SlashNotAValidator,
            "admin-blacklisted" => AdminBlacklisted,
            "admin-not-authorized" => AdminNotAuthorized,
            _ => return Err(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_from_str_roundtrip() {
        for err in [
            ValidationError::InitWrongEpoch,
            ValidationError::VoteSrcEpochNotJustified,
            ValidationError::SlashNotValid,
            ValidationError::AdminBlacklisted,
        ] {
            assert_eq!(err.to_string().parse::<ValidationError>(), Ok(err));
        }
        assert!("no-such-tag".parse::<ValidationError>().is_err());
    }
}
