mod common;

use common::*;
use serde_json::{json, Value};
use stargazers::error::StargazersError;
use stargazers::github::GitHubClient;
use stargazers::http::{HttpResponse, StopSignal};
use stargazers::loader::{LoaderEvent, LoaderOutcome, LoaderPlan, StargazerListLoader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn plan(config: stargazers::config::Configuration, first_page: u32) -> LoaderPlan {
    LoaderPlan {
        session: 1,
        config,
        viewport_rows: 15,
        first_page,
    }
}

/// Runs one session and returns its batches (as login lists) and outcome.
async fn run(
    fetcher: Arc<ScriptedFetcher>,
    plan: LoaderPlan,
    page_timeout: Duration,
    stop: StopSignal,
) -> (Vec<Vec<String>>, LoaderOutcome) {
    let loader = StargazerListLoader::new(GitHubClient::new(fetcher).with_page_timeout(page_timeout));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move { loader.run(plan, stop, tx).await });

    let mut batches = Vec::new();
    let outcome = loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(LoaderEvent::Batch { stargazers, .. })) => {
                batches.push(stargazers.into_iter().map(|s| s.login).collect())
            }
            Ok(Some(LoaderEvent::Finished { session, outcome })) => {
                assert_eq!(session, 1);
                break outcome;
            }
            Ok(None) => panic!("loader dropped its sender without finishing"),
            Err(_) => panic!("loader did not finish in time"),
        }
    };
    task.await.unwrap();
    (batches, outcome)
}

#[tokio::test]
async fn test_single_page_skips_non_users() {
    let mut body = users("user", 30);
    let entries = body.as_array_mut().unwrap();
    entries.insert(3, organization("acme"));
    entries.push(organization("globex"));

    let fetcher = ScriptedFetcher::new(vec![Reply::Respond(json_response(body))]);
    let (batches, outcome) = run(
        fetcher.clone(),
        plan(test_config(), 1),
        Duration::from_secs(30),
        StopSignal::new(),
    )
    .await;

    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 30);
    assert_eq!(batches[0][0], "user-0");
    assert_eq!(batches[0][29], "user-29");
    assert!(!batches[0].iter().any(|l| l == "acme" || l == "globex"));

    assert!(matches!(
        outcome,
        LoaderOutcome::Success {
            added: 30,
            next_page: 2
        }
    ));

    let requests = fetcher.requests();
    assert_eq!(requests.len(), 1, "only load-all follows further pages");
    assert_eq!(
        requests[0].url,
        "https://api.example.com/repos/octocat/hello-world/stargazers?page=1&per_page=30"
    );
}

#[tokio::test]
async fn test_load_all_follows_pages_until_empty() {
    let mut config = test_config();
    config.load_all = true;

    let fetcher = ScriptedFetcher::new(vec![page("a", 100), page("b", 5), empty_page()]);
    let (batches, outcome) = run(
        fetcher.clone(),
        plan(config, 1),
        Duration::from_secs(30),
        StopSignal::new(),
    )
    .await;

    assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![100, 5]);
    assert!(matches!(
        outcome,
        LoaderOutcome::Success {
            added: 105,
            next_page: 3
        }
    ));

    let urls: Vec<String> = fetcher.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(urls.len(), 3);
    for (n, url) in urls.iter().enumerate() {
        assert!(url.ends_with(&format!("?page={}&per_page=100", n + 1)), "{}", url);
    }
}

#[tokio::test]
async fn test_page_of_only_non_users_ends_load_all() {
    let mut config = test_config();
    config.load_all = true;

    let body = Value::Array(vec![organization("acme"), organization("globex")]);
    let fetcher = ScriptedFetcher::new(vec![page("a", 3), Reply::Respond(json_response(body))]);
    let (batches, outcome) = run(
        fetcher.clone(),
        plan(config, 1),
        Duration::from_secs(30),
        StopSignal::new(),
    )
    .await;

    assert_eq!(batches.len(), 1);
    assert!(matches!(outcome, LoaderOutcome::Success { added: 3, .. }));
    assert_eq!(fetcher.request_count(), 2);
}

#[tokio::test]
async fn test_rate_limit_body_ends_with_error() {
    let reset = chrono::Utc::now().timestamp() + 120;
    let response = HttpResponse {
        status: 403,
        headers: vec![
            ("X-RateLimit-Limit".to_string(), "60".to_string()),
            ("X-RateLimit-Remaining".to_string(), "0".to_string()),
            ("X-RateLimit-Reset".to_string(), reset.to_string()),
        ],
        body: json!({"message": "API rate limit exceeded for 10.0.0.1."})
            .to_string()
            .into_bytes(),
    };

    let fetcher = ScriptedFetcher::new(vec![Reply::Respond(response)]);
    let (batches, outcome) = run(
        fetcher,
        plan(test_config(), 1),
        Duration::from_secs(30),
        StopSignal::new(),
    )
    .await;

    assert!(batches.is_empty());
    let LoaderOutcome::Error(StargazersError::RateLimitExceeded(state)) = outcome else {
        panic!("expected rate limit error, got {:?}", outcome);
    };
    assert_eq!(state.limit, 60);
    assert_eq!(state.remaining, 0);
    assert!((118..=120).contains(&state.wait_seconds));
}

#[tokio::test]
async fn test_page_timeout_is_an_error() {
    let fetcher = ScriptedFetcher::new(vec![Reply::Hang]);
    let (batches, outcome) = run(
        fetcher,
        plan(test_config(), 1),
        Duration::from_millis(50),
        StopSignal::new(),
    )
    .await;

    assert!(batches.is_empty());
    assert!(matches!(outcome, LoaderOutcome::Error(StargazersError::Timeout)));
}

#[tokio::test]
async fn test_invalid_configuration_makes_no_request() {
    let mut config = test_config();
    config.owner = String::new();

    let fetcher = ScriptedFetcher::new(vec![page("a", 3)]);
    let (_, outcome) = run(
        fetcher.clone(),
        plan(config, 1),
        Duration::from_secs(30),
        StopSignal::new(),
    )
    .await;

    assert!(matches!(
        outcome,
        LoaderOutcome::Error(StargazersError::InvalidConfiguration(_))
    ));
    assert_eq!(fetcher.request_count(), 0);
}

#[tokio::test]
async fn test_stop_cancels_pending_request() {
    let fetcher = ScriptedFetcher::new(vec![Reply::Hang]);
    let stop = StopSignal::new();

    let waiter = {
        let fetcher = fetcher.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            fetcher.wait_for_requests(1).await;
            stop.stop();
        })
    };

    let (batches, outcome) = run(
        fetcher,
        plan(test_config(), 1),
        Duration::from_secs(30),
        stop,
    )
    .await;
    waiter.await.unwrap();

    assert!(batches.is_empty());
    assert!(matches!(outcome, LoaderOutcome::Cancelled));
}

#[tokio::test]
async fn test_stopped_before_start_sends_nothing() {
    let fetcher = ScriptedFetcher::new(vec![page("a", 3)]);
    let stop = StopSignal::new();
    stop.stop();

    let (batches, outcome) = run(fetcher.clone(), plan(test_config(), 1), Duration::from_secs(30), stop).await;

    assert!(batches.is_empty());
    assert!(matches!(outcome, LoaderOutcome::Cancelled));
    assert_eq!(fetcher.request_count(), 0);
}

#[tokio::test]
async fn test_continues_from_first_page_of_plan() {
    let fetcher = ScriptedFetcher::new(vec![page("c", 4)]);
    let (_, outcome) = run(
        fetcher.clone(),
        plan(test_config(), 3),
        Duration::from_secs(30),
        StopSignal::new(),
    )
    .await;

    assert!(matches!(
        outcome,
        LoaderOutcome::Success {
            added: 4,
            next_page: 4
        }
    ));
    assert!(fetcher.requests()[0].url.contains("page=3&"));
}

#[tokio::test]
async fn test_empty_first_page_keeps_cursor() {
    let fetcher = ScriptedFetcher::new(vec![empty_page()]);
    let (batches, outcome) = run(
        fetcher,
        plan(test_config(), 2),
        Duration::from_secs(30),
        StopSignal::new(),
    )
    .await;

    assert!(batches.is_empty());
    assert!(matches!(
        outcome,
        LoaderOutcome::Success {
            added: 0,
            next_page: 2
        }
    ));
}
