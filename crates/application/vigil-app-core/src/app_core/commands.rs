use vigil_core::WorkItem;

#[derive(Debug, Clone)]
pub enum AppCommand {
    Submit(WorkItem),
    Cancel,
    DisregardParentFailure,
    Exit,
}
