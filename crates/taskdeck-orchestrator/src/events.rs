use taskdeck_store::TaskItem;

/// Events published on the task service's broadcast channel.
///
/// The scheduler loop subscribes for event-triggered ticks; any UI layer or
/// downstream project logic can register against the same channel.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// The task list changed in some way (create, update, move, delete,
    /// evidence append, compaction).
    ListChanged,
    /// The process-wide execution pause flag flipped to the given value.
    PauseChanged(bool),
    /// A task transitioned into `Done`. Carries the finished task so
    /// completion collaborators can unlock downstream work.
    Completed(TaskItem),
}
