use crate::error::AppError;
use crate::notify::{Notifier, ReminderAlert, activation_argument, launch_show};
use notify_rust::Notification;

pub struct LinuxNotifier;

impl Notifier for LinuxNotifier {
    fn display(&self, alert: &ReminderAlert) -> Result<(), AppError> {
        let action = activation_argument(alert.task_id);
        let mut notification = Notification::new();
        notification.appname("remind");
        notification.summary(&format!("\u{1F514} {}", alert.title));
        notification.body(&alert.body);
        // Same id for the same task: a re-fire replaces the earlier bubble.
        notification.id(notification_id(alert.task_id));
        notification.action(&action, "Open");

        let handle = notification
            .show()
            .map_err(|err| AppError::io(err.to_string()))?;

        let task_id = alert.task_id;
        std::thread::spawn(move || {
            handle.wait_for_action(|selected| {
                if selected == action || selected == "default" {
                    if let Err(err) = launch_show(task_id) {
                        tracing::warn!(task_id, error = %err, "could not open task");
                    }
                }
            });
        });

        Ok(())
    }
}

fn notification_id(task_id: i64) -> u32 {
    // Zero asks the server to allocate a fresh id, which defeats replacement.
    (task_id.rem_euclid(i64::from(u32::MAX)) as u32).max(1)
}
