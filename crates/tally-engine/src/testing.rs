use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use tally_db::Database;
use tally_types::api::{CreatePollRequest, OptionInput};
use tally_types::models::{Gender, Member, MemberRole};

use crate::clock::{Clock, ManualClock};
use crate::emitter::{PollVotedEvent, VoteBroadcaster};
use crate::service::PollService;

/// Broadcaster that keeps every event for inspection.
#[derive(Default)]
pub(crate) struct RecordingBroadcaster {
    events: Mutex<Vec<PollVotedEvent>>,
}

impl RecordingBroadcaster {
    pub(crate) fn events(&self) -> Vec<PollVotedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl VoteBroadcaster for RecordingBroadcaster {
    fn publish(&self, event: PollVotedEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub(crate) const POLL_OWNER: i64 = 1000;

pub(crate) struct Fixture {
    _dir: tempfile::TempDir,
    pub(crate) db: Arc<Database>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) events: Arc<RecordingBroadcaster>,
    pub(crate) service: PollService,
}

impl Fixture {
    pub(crate) fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("tally.db")).unwrap());
        let clock = Arc::new(ManualClock::new(Self::start()));
        let events = Arc::new(RecordingBroadcaster::default());
        let service = PollService::new(db.clone(), events.clone()).with_clock(clock.clone());

        let fx = Self {
            _dir: dir,
            db,
            clock,
            events,
            service,
        };
        fx.member(POLL_OWNER, MemberRole::User, Some(35), Some(Gender::Male));
        fx
    }

    pub(crate) fn member(&self, id: i64, role: MemberRole, age: Option<u32>, gender: Option<Gender>) {
        self.db
            .upsert_member(&Member { id, role, age, gender })
            .unwrap();
    }

    pub(crate) fn voter(&self, id: i64) {
        self.member(id, MemberRole::User, Some(27), Some(Gender::Female));
    }

    /// Create a 찬성/반대 poll owned by `POLL_OWNER` and return its option ids.
    pub(crate) fn create_poll(
        &self,
        post_id: i64,
        reserved_close_at: Option<DateTime<Utc>>,
    ) -> (i64, [i64; 2]) {
        let view = self
            .service
            .create_poll(
                CreatePollRequest {
                    post_id,
                    title: "이 판결에 동의하십니까?".into(),
                    options: vec![
                        OptionInput { content: "찬성".into() },
                        OptionInput { content: "반대".into() },
                    ],
                    reserved_close_at,
                },
                POLL_OWNER,
            )
            .unwrap();
        (view.poll_id, [view.options[0].option_id, view.options[1].option_id])
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
