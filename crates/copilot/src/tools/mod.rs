//! A set of built-in tools that models can use.

mod biomarkers;
mod local_time;
mod schedule_task;

pub use biomarkers::CompareBiomarkersTool;
pub use local_time::GetLocalTimeTool;
pub use schedule_task::ScheduleTaskTool;
