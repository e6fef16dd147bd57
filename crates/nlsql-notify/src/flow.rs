//! Pulls a batch of non-SQL answers and hands it to every presenter.

use std::sync::Arc;

use async_trait::async_trait;

use nlsql_core::config::NotifyConfig;
use nlsql_core::{
    GetNonSqlAnswersRequest, NonSqlAnswerRepo, NonSqlPresenter, NotifyFlow, NotifyReport,
    PresenterOutcome,
};

/// One notification cycle per [`NotifyFlow::fetch_and_notify`] call.
///
/// Presenters run in registration order and each one receives the same
/// batch. A failing presenter is logged and recorded in the report; the
/// remaining presenters still run.
pub struct NonSqlNotifyFlow {
    repo: Arc<dyn NonSqlAnswerRepo>,
    presenters: Vec<Arc<dyn NonSqlPresenter>>,
    max_items: usize,
}

impl NonSqlNotifyFlow {
    pub fn new(repo: Arc<dyn NonSqlAnswerRepo>, config: &NotifyConfig) -> Self {
        Self {
            repo,
            presenters: Vec::new(),
            max_items: config.max_items,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn add_presenter(&mut self, presenter: Arc<dyn NonSqlPresenter>) -> &mut Self {
        tracing::debug!(presenter = %presenter.name(), "Presenter registered");
        self.presenters.push(presenter);
        self
    }

    pub fn presenter_count(&self) -> usize {
        self.presenters.len()
    }
}

#[async_trait]
impl NotifyFlow for NonSqlNotifyFlow {
    async fn fetch_and_notify(&self) -> NotifyReport {
        let request = GetNonSqlAnswersRequest {
            page_size: self.max_items,
        };
        let page = match self.repo.get_non_sql_answers(request).await {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, "Could not fetch non-SQL answers");
                return NotifyReport::repo_failed(e);
            }
        };
        if page.partial {
            tracing::warn!(
                fetched = page.answers.len(),
                skipped = page.skipped,
                "Answer page is partial"
            );
        }
        tracing::info!(fetched = page.answers.len(), presenters = self.presenters.len(), "Notifying presenters");

        let mut outcomes = Vec::with_capacity(self.presenters.len());
        for presenter in &self.presenters {
            let result = presenter.present(&page.answers).await;
            if let Err(ref e) = result {
                tracing::warn!(presenter = %presenter.name(), error = %e, "Presenter failed");
            }
            outcomes.push(PresenterOutcome {
                presenter: presenter.name().to_string(),
                result,
            });
        }

        NotifyReport {
            fetched: page.answers.len(),
            repo_error: None,
            outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use nlsql_core::{AnswerPage, FlowError, NonSqlAnswer, Result};

    fn answer(i: usize) -> NonSqlAnswer {
        NonSqlAnswer {
            session_id: format!("s{}", i),
            db_id: "nb".to_string(),
            question: format!("question {}", i),
            answer: format!("answer {}", i),
        }
    }

    struct FixedRepo {
        answers: Vec<NonSqlAnswer>,
        requests: Mutex<Vec<usize>>,
    }

    impl FixedRepo {
        fn new(count: usize) -> Arc<Self> {
            Arc::new(Self {
                answers: (0..count).map(answer).collect(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NonSqlAnswerRepo for FixedRepo {
        async fn get_non_sql_answers(&self, request: GetNonSqlAnswersRequest) -> Result<AnswerPage> {
            self.requests.lock().unwrap().push(request.page_size);
            let answers = self.answers.iter().take(request.page_size).cloned().collect();
            Ok(AnswerPage::complete(answers))
        }
    }

    struct FailingRepo;

    #[async_trait]
    impl NonSqlAnswerRepo for FailingRepo {
        async fn get_non_sql_answers(&self, _request: GetNonSqlAnswersRequest) -> Result<AnswerPage> {
            Err(FlowError::upstream(503, "stream unavailable"))
        }
    }

    /// Records every batch it sees into a log shared with other presenters.
    struct RecordingPresenter {
        name: String,
        fail: bool,
        log: Arc<Mutex<Vec<(String, Vec<NonSqlAnswer>)>>>,
    }

    #[async_trait]
    impl NonSqlPresenter for RecordingPresenter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn present(&self, answers: &[NonSqlAnswer]) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push((self.name.clone(), answers.to_vec()));
            if self.fail {
                return Err(FlowError::Presenter(format!("{} is down", self.name)));
            }
            Ok(())
        }
    }

    type Log = Arc<Mutex<Vec<(String, Vec<NonSqlAnswer>)>>>;

    fn presenter(name: &str, fail: bool, log: &Log) -> Arc<dyn NonSqlPresenter> {
        Arc::new(RecordingPresenter {
            name: name.to_string(),
            fail,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn test_presenters_get_identical_batch_in_order() {
        let log: Log = Arc::default();
        let mut flow = NonSqlNotifyFlow::new(FixedRepo::new(3), &NotifyConfig::default());
        flow.add_presenter(presenter("first", false, &log))
            .add_presenter(presenter("second", false, &log))
            .add_presenter(presenter("third", false, &log));

        let report = flow.fetch_and_notify().await;
        assert!(report.is_complete());
        assert_eq!(report.fetched, 3);

        let log = log.lock().unwrap();
        let names: Vec<&str> = log.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert!(log.iter().all(|(_, batch)| *batch == log[0].1));
        assert_eq!(log[0].1, (0..3).map(answer).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_requests_at_most_max_items() {
        let repo = FixedRepo::new(30);
        let log: Log = Arc::default();
        let mut flow = NonSqlNotifyFlow::new(repo.clone(), &NotifyConfig::default());
        flow.add_presenter(presenter("only", false, &log));

        let report = flow.fetch_and_notify().await;
        assert_eq!(report.fetched, 10);
        assert_eq!(*repo.requests.lock().unwrap(), vec![10]);

        let flow = NonSqlNotifyFlow::new(repo.clone(), &NotifyConfig::default()).with_max_items(25);
        assert_eq!(flow.fetch_and_notify().await.fetched, 25);
    }

    #[tokio::test]
    async fn test_failing_presenter_does_not_stop_others() {
        let log: Log = Arc::default();
        let mut flow = NonSqlNotifyFlow::new(FixedRepo::new(2), &NotifyConfig::default());
        flow.add_presenter(presenter("ok-1", false, &log))
            .add_presenter(presenter("broken", true, &log))
            .add_presenter(presenter("ok-2", false, &log));

        let report = flow.fetch_and_notify().await;
        assert!(report.is_partial());
        assert_eq!(report.failed_presenters(), 1);
        assert_eq!(report.outcomes[1].presenter, "broken");
        assert!(report.outcomes[1].result.is_err());
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_repo_failure_skips_presenters() {
        let log: Log = Arc::default();
        let mut flow = NonSqlNotifyFlow::new(Arc::new(FailingRepo), &NotifyConfig::default());
        flow.add_presenter(presenter("p", false, &log));

        let report = flow.fetch_and_notify().await;
        assert_eq!(
            report.repo_error,
            Some(FlowError::upstream(503, "stream unavailable"))
        );
        assert!(report.outcomes.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_still_reaches_presenters() {
        let log: Log = Arc::default();
        let mut flow = NonSqlNotifyFlow::new(FixedRepo::new(0), &NotifyConfig::default());
        flow.add_presenter(presenter("p", false, &log));

        let report = flow.fetch_and_notify().await;
        assert!(report.is_complete());
        assert_eq!(report.fetched, 0);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_no_presenters_is_fine() {
        let flow = NonSqlNotifyFlow::new(FixedRepo::new(2), &NotifyConfig::default());
        assert_eq!(flow.presenter_count(), 0);
        let report = flow.fetch_and_notify().await;
        assert!(report.is_complete());
        assert_eq!(report.fetched, 2);
    }
}
