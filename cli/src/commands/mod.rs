mod helpers;
mod log;
mod show;
mod sync;

use reps_core::service::ExerciseService;

use crate::remote::HttpRecordClient;

pub(crate) type Service = ExerciseService<HttpRecordClient>;

pub(crate) use log::{LogArgs, cmd_log, cmd_remove};
pub(crate) use show::{cmd_month, cmd_show};
pub(crate) use sync::{cmd_queue_clear, cmd_queue_list, cmd_status, cmd_sync, cmd_watch};
