use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::fetcher::{extract_game_id, SessionFetcher};
use crate::resolver::resolve_player;
use crate::types::{ErrorKind, GameOutcome, GameTarget, PlayerIdentity, ResultBundle};

/// Run one game's pipeline. Never fails and never panics: every problem,
/// including a panic inside `pipeline`, comes back as `GameOutcome::Failure`.
pub async fn aggregate_one<F>(target: &GameTarget, pipeline: F) -> GameOutcome
where
    F: Future<Output = GameOutcome>,
{
    info!(game_url = %target.url, "Processing game");
    let outcome = contain_unexpected(pipeline).await;
    log_outcome(&target.url, &outcome);
    outcome
}

/// extract → fetch → resolve
async fn game_pipeline(
    fetcher: &SessionFetcher,
    target: &GameTarget,
    identity: &PlayerIdentity,
) -> GameOutcome {
    let Some(game_id) = extract_game_id(&target.url) else {
        return GameOutcome::failure(
            ErrorKind::InvalidUrl,
            format!("could not extract game id from {}", target.url),
        );
    };
    debug!(game_id, "Extracted game ID");

    let records = match fetcher.fetch(game_id).await {
        Ok(records) => records,
        Err(e) => return GameOutcome::failure(e.kind(), e.to_string()),
    };

    match resolve_player(&records, identity) {
        Ok(net) => GameOutcome::Success(net),
        Err(e) => GameOutcome::failure(e.kind(), e.to_string()),
    }
}

/// Convert a panic in `fut` into an `Unexpected` failure.
async fn contain_unexpected<F>(fut: F) -> GameOutcome
where
    F: Future<Output = GameOutcome>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            GameOutcome::failure(ErrorKind::Unexpected, panic_message(payload.as_ref()))
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn log_outcome(game_url: &str, outcome: &GameOutcome) {
    match outcome {
        GameOutcome::Success(net) => {
            info!(game_url, %net, "Successfully processed game {game_url}: {net}")
        }
        GameOutcome::Failure {
            kind: ErrorKind::Unexpected,
            detail,
        } => error!(game_url, kind = %ErrorKind::Unexpected, detail = %detail, "Error processing game {game_url}: {detail}"),
        GameOutcome::Failure { kind, detail } => {
            warn!(game_url, kind = %kind, detail = %detail, "Error for game {game_url}: {}", kind.label())
        }
    }
}

/// Run one tracking cycle over `targets` in input order.
///
/// Every distinct URL is visited exactly once; a repeated URL is skipped so it
/// is neither duplicated in `results` nor counted twice in the total. An empty
/// target list yields `ResultBundle::empty()` (has_errors = true).
pub async fn aggregate_all(
    fetcher: &SessionFetcher,
    targets: &[GameTarget],
    identity: &PlayerIdentity,
) -> ResultBundle {
    aggregate_with(targets, |target| game_pipeline(fetcher, target, identity)).await
}

/// Fold `pipeline` over `targets`, each game contained on its own.
async fn aggregate_with<'a, P, F>(targets: &'a [GameTarget], mut pipeline: P) -> ResultBundle
where
    P: FnMut(&'a GameTarget) -> F,
    F: Future<Output = GameOutcome>,
{
    if targets.is_empty() {
        warn!("No game URLs provided");
        return ResultBundle::empty();
    }
    info!("Starting to fetch results for {} games", targets.len());

    let mut results: IndexMap<String, GameOutcome> = IndexMap::new();
    let mut total_profit = Decimal::ZERO;
    let mut has_errors = false;

    for target in targets {
        if results.contains_key(&target.url) {
            debug!(game_url = %target.url, "Skipping duplicate game URL");
            continue;
        }

        let outcome = aggregate_one(target, pipeline(target)).await;
        match &outcome {
            GameOutcome::Success(net) => total_profit = total_profit.saturating_add(*net),
            GameOutcome::Failure { .. } => has_errors = true,
        }
        results.insert(target.url.clone(), outcome);
    }

    info!(
        games = results.len(),
        %total_profit,
        has_errors,
        "Cycle complete: total profit {total_profit}"
    );

    ResultBundle {
        results,
        total_profit,
        has_errors,
    }
}
