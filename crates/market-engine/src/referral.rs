//! # Referral Service
//!
//! Account registration and the one-time referral bonus.
//!
//! ## Registration Flow
//! ```text
//! register_account(input, token?)
//!      │
//!      ▼
//! BEGIN
//!   INSERT account (member number + referral code drawn at random,
//!                   redrawn on collision)
//!   token given? ──► resolve token ──► unknown / own code / own invitee → InvalidToken (warn, keep going)
//!                          │
//!                          ▼
//!                   referred_by = referrer      (only if still unset)
//!                   +bonus referrer, +bonus new account (kind "referral")
//! COMMIT
//! ```
//!
//! A referral that names an unknown token never blocks registration. An
//! account that already has a referrer can never be credited again.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::balance::{credit_in, missing_account};
use crate::config::CheckoutSettings;
use crate::error::EngineResult;
use crate::retry::with_retry;
use market_core::validation::{
    validate_external_ref, validate_referral_token, MEMBER_NUMBER_LEN, REFERRAL_TOKEN_LEN,
};
use market_core::{Account, CoreError, LedgerKind, NewAccount, StoreSettings};
use market_db::{AccountRepository, Database, DbError, SettingsRepository};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Draws before giving up on a unique member number / referral code.
const CODE_ATTEMPTS: u32 = 8;

/// What a referral attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReferralOutcome {
    /// Both parties were credited `bonus` points.
    Applied { referrer_id: String, bonus: i64 },
    /// The token matched no other account. Nothing was credited.
    InvalidToken { token: String },
}

impl ReferralOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReferralOutcome::Applied { .. })
    }
}

/// A newly created account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub account: Account,
    /// Present when a referral token was supplied.
    pub referral: Option<ReferralOutcome>,
}

/// Registration and referral bonuses.
#[derive(Debug, Clone)]
pub struct ReferralService {
    db: Database,
    policy: CheckoutSettings,
}

impl ReferralService {
    pub fn new(db: Database, policy: CheckoutSettings) -> Self {
        ReferralService { db, policy }
    }

    /// Creates an account with a zero balance and its profile codes,
    /// applying `referral_token` in the same unit.
    ///
    /// Fails with a `Conflict` code when `external_ref` is taken.
    pub async fn register_account(
        &self,
        input: NewAccount,
        referral_token: Option<&str>,
    ) -> EngineResult<Registration> {
        validate_external_ref(&input.external_ref)?;
        let input = &input;

        let registration = with_retry("register_account", &self.policy, move || {
            self.try_register(input, referral_token)
        })
        .await?;

        info!(
            account_id = %registration.account.id,
            member_number = %registration.account.member_number,
            referred = registration.referral.as_ref().is_some_and(ReferralOutcome::is_applied),
            "Account registered"
        );
        Ok(registration)
    }

    async fn try_register(
        &self,
        input: &NewAccount,
        referral_token: Option<&str>,
    ) -> EngineResult<Registration> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let mut account = insert_with_codes(&mut tx, input, now).await?;

        let referral = match referral_token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => {
                let settings = SettingsRepository::load(&mut tx).await?;
                let outcome = apply_in(&mut tx, &account, token, &settings, now).await?;
                if let ReferralOutcome::Applied { referrer_id, bonus } = &outcome {
                    account.referred_by = Some(referrer_id.clone());
                    account.points += bonus;
                }
                Some(outcome)
            }
            None => None,
        };

        tx.commit().await.map_err(DbError::from)?;
        Ok(Registration { account, referral })
    }

    /// Records `token`'s owner as the account's referrer and credits both.
    ///
    /// ## Errors
    /// - `AlreadyReferred` when the account already has a referrer, whatever
    ///   the token
    /// - `AccountNotFound`
    ///
    /// An unknown token is not an error: it returns
    /// [`ReferralOutcome::InvalidToken`]. So do the account's own code and
    /// the code of an account it referred, which would pay a mutual bonus.
    pub async fn apply_referral(&self, account_id: &str, token: &str) -> EngineResult<ReferralOutcome> {
        with_retry("apply_referral", &self.policy, move || async move {
            let now = Utc::now();
            let mut tx = self.db.begin().await?;

            let account = AccountRepository::lock_for_update(&mut tx, account_id, now)
                .await
                .map_err(|e| missing_account(e, account_id))?;
            if account.referred_by.is_some() {
                return Err(CoreError::AlreadyReferred(account_id.to_string()).into());
            }

            let settings = SettingsRepository::load(&mut tx).await?;
            let outcome = apply_in(&mut tx, &account, token, &settings, now).await?;
            tx.commit().await.map_err(DbError::from)?;
            Ok(outcome)
        })
        .await
    }
}

/// Inserts the account, redrawing codes that collide.
async fn insert_with_codes(
    conn: &mut SqliteConnection,
    input: &NewAccount,
    now: DateTime<Utc>,
) -> EngineResult<Account> {
    let mut account = Account {
        id: Uuid::new_v4().to_string(),
        external_ref: input.external_ref.trim().to_string(),
        member_number: random_code(MEMBER_NUMBER_LEN),
        phone_number: input.phone_number.clone(),
        address: input.address.clone(),
        points: 0,
        referral_code: random_code(REFERRAL_TOKEN_LEN),
        referred_by: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };

    let mut attempt = 1;
    loop {
        match AccountRepository::insert(conn, &account).await {
            Ok(()) => return Ok(account),
            Err(err) if attempt < CODE_ATTEMPTS && err.is_unique_violation_on("member_number") => {
                debug!(attempt, "Member number collision");
                account.member_number = random_code(MEMBER_NUMBER_LEN);
            }
            Err(err) if attempt < CODE_ATTEMPTS && err.is_unique_violation_on("referral_code") => {
                debug!(attempt, "Referral code collision");
                account.referral_code = random_code(REFERRAL_TOKEN_LEN);
            }
            Err(err) => return Err(err.into()),
        }
        attempt += 1;
    }
}

/// Resolves `token` and credits both parties on the caller's transaction.
async fn apply_in(
    conn: &mut SqliteConnection,
    account: &Account,
    token: &str,
    settings: &StoreSettings,
    now: DateTime<Utc>,
) -> EngineResult<ReferralOutcome> {
    let invalid = || {
        warn!(account_id = %account.id, token = %token, "Ignoring invalid referral token");
        ReferralOutcome::InvalidToken {
            token: token.to_string(),
        }
    };

    let Ok(code) = validate_referral_token(token) else {
        return Ok(invalid());
    };
    // Own code, or the code of someone this account invited
    let referrer = match AccountRepository::find_by_referral_code(conn, &code).await? {
        Some(referrer)
            if referrer.id != account.id
                && referrer.referred_by.as_deref() != Some(account.id.as_str()) =>
        {
            referrer
        }
        _ => return Ok(invalid()),
    };

    if !AccountRepository::set_referrer_once(conn, &account.id, &referrer.id, now).await? {
        return Err(CoreError::AlreadyReferred(account.id.clone()).into());
    }

    let bonus = settings.referral_bonus_amount;
    if bonus > 0 {
        credit_in(
            conn,
            &referrer.id,
            bonus,
            LedgerKind::Referral,
            &format!("Referral bonus for inviting {}", account.member_number),
            now,
        )
        .await?;
        credit_in(
            conn,
            &account.id,
            bonus,
            LedgerKind::Referral,
            &format!("Referral bonus from {}", referrer.member_number),
            now,
        )
        .await?;
    }

    info!(
        account_id = %account.id,
        referrer_id = %referrer.id,
        bonus,
        "Referral applied"
    );
    Ok(ReferralOutcome::Applied {
        referrer_id: referrer.id,
        bonus,
    })
}

fn random_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, ErrorCode};
    use crate::testing::test_db;

    fn service(db: &Database) -> ReferralService {
        ReferralService::new(db.clone(), CheckoutSettings::default())
    }

    #[test]
    fn test_random_code_shape() {
        let code = random_code(REFERRAL_TOKEN_LEN);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_register_creates_profile() {
        let db = test_db().await;
        let mut input = NewAccount::new("alice");
        input.phone_number = Some("0812345678".to_string());

        let registration = service(&db).register_account(input, None).await.unwrap();
        let account = registration.account;
        assert_eq!(account.points, 0);
        assert_eq!(account.member_number.len(), MEMBER_NUMBER_LEN);
        assert_eq!(account.referral_code.len(), REFERRAL_TOKEN_LEN);
        assert!(registration.referral.is_none());

        let stored = db.accounts().get_by_id(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.phone_number.as_deref(), Some("0812345678"));
    }

    #[tokio::test]
    async fn test_duplicate_external_ref() {
        let db = test_db().await;
        service(&db).register_account(NewAccount::new("alice"), None).await.unwrap();

        let err = service(&db)
            .register_account(NewAccount::new("alice"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn test_referral_at_registration_credits_both() {
        let db = test_db().await;
        let referrer = service(&db)
            .register_account(NewAccount::new("referrer"), None)
            .await
            .unwrap()
            .account;

        // Tokens are case-insensitive
        let token = referrer.referral_code.to_ascii_lowercase();
        let registration = service(&db)
            .register_account(NewAccount::new("newcomer"), Some(&token))
            .await
            .unwrap();

        assert_eq!(
            registration.referral,
            Some(ReferralOutcome::Applied {
                referrer_id: referrer.id.clone(),
                bonus: 50
            })
        );
        assert_eq!(registration.account.points, 50);
        assert_eq!(db.accounts().balance(&referrer.id).await.unwrap(), 50);

        for id in [&referrer.id, &registration.account.id] {
            let entries = db.ledger().recent(id, 10).await.unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].kind, LedgerKind::Referral);
            assert!(db.accounts().reconcile(id).await.unwrap().is_consistent());
        }
    }

    #[tokio::test]
    async fn test_invalid_token_does_not_block_registration() {
        let db = test_db().await;
        let registration = service(&db)
            .register_account(NewAccount::new("newcomer"), Some("ZZZZZZ"))
            .await
            .unwrap();

        assert!(matches!(
            registration.referral,
            Some(ReferralOutcome::InvalidToken { .. })
        ));
        assert_eq!(registration.account.points, 0);
        assert_eq!(db.ledger().count(&registration.account.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_referral_rejected() {
        let db = test_db().await;
        let svc = service(&db);
        let first = svc.register_account(NewAccount::new("first"), None).await.unwrap().account;
        let second = svc.register_account(NewAccount::new("second"), None).await.unwrap().account;
        let member = svc.register_account(NewAccount::new("member"), None).await.unwrap().account;

        let outcome = svc.apply_referral(&member.id, &first.referral_code).await.unwrap();
        assert!(outcome.is_applied());
        let member_entries = db.ledger().count(&member.id).await.unwrap();
        let first_entries = db.ledger().count(&first.id).await.unwrap();
        let second_entries = db.ledger().count(&second.id).await.unwrap();

        let err = svc
            .apply_referral(&member.id, &second.referral_code)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::AlreadyReferred(_))));

        // Even a bad token reports AlreadyReferred once a referrer is set
        let err = svc.apply_referral(&member.id, "bad").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyReferred);

        assert_eq!(db.accounts().balance(&member.id).await.unwrap(), 50);
        assert_eq!(db.accounts().balance(&second.id).await.unwrap(), 0);
        assert_eq!(db.ledger().count(&member.id).await.unwrap(), member_entries);
        assert_eq!(db.ledger().count(&first.id).await.unwrap(), first_entries);
        assert_eq!(db.ledger().count(&second.id).await.unwrap(), second_entries);
    }

    #[tokio::test]
    async fn test_referring_back_an_invitee_is_invalid() {
        let db = test_db().await;
        let svc = service(&db);
        let inviter = svc.register_account(NewAccount::new("inviter"), None).await.unwrap().account;
        let invitee = svc
            .register_account(NewAccount::new("invitee"), Some(&inviter.referral_code))
            .await
            .unwrap()
            .account;
        let inviter_entries = db.ledger().count(&inviter.id).await.unwrap();

        let outcome = svc
            .apply_referral(&inviter.id, &invitee.referral_code)
            .await
            .unwrap();
        assert!(matches!(outcome, ReferralOutcome::InvalidToken { .. }));

        assert_eq!(db.accounts().balance(&inviter.id).await.unwrap(), 50);
        assert_eq!(db.accounts().balance(&invitee.id).await.unwrap(), 50);
        assert_eq!(db.ledger().count(&inviter.id).await.unwrap(), inviter_entries);
        let inviter_row = db.accounts().get_by_id(&inviter.id).await.unwrap().unwrap();
        assert!(inviter_row.referred_by.is_none());
    }

    #[tokio::test]
    async fn test_self_referral_is_invalid() {
        let db = test_db().await;
        let svc = service(&db);
        let account = svc.register_account(NewAccount::new("solo"), None).await.unwrap().account;

        let outcome = svc
            .apply_referral(&account.id, &account.referral_code)
            .await
            .unwrap();
        assert!(matches!(outcome, ReferralOutcome::InvalidToken { .. }));

        // Still free to be referred by someone else
        let other = svc.register_account(NewAccount::new("other"), None).await.unwrap().account;
        assert!(svc
            .apply_referral(&account.id, &other.referral_code)
            .await
            .unwrap()
            .is_applied());
    }

    #[tokio::test]
    async fn test_bonus_follows_settings() {
        let db = test_db().await;
        let mut settings = db.settings().current().await.unwrap();
        settings.referral_bonus_amount = 120;
        db.settings().save(&settings, Utc::now()).await.unwrap();

        let svc = service(&db);
        let referrer = svc.register_account(NewAccount::new("a"), None).await.unwrap().account;
        let registration = svc
            .register_account(NewAccount::new("b"), Some(&referrer.referral_code))
            .await
            .unwrap();
        assert_eq!(registration.account.points, 120);
        assert_eq!(db.accounts().balance(&referrer.id).await.unwrap(), 120);
    }
}
