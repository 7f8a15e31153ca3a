use crate::error::AppError;
use crate::notify::{Notifier, ReminderAlert, activation_argument, launch_show, parse_activation_argument};
use tauri_winrt_notification::{Scenario, Toast};

pub struct WindowsNotifier;

impl Notifier for WindowsNotifier {
    fn display(&self, alert: &ReminderAlert) -> Result<(), AppError> {
        let task_id = alert.task_id;
        let action = activation_argument(task_id);

        Toast::new(Toast::POWERSHELL_APP_ID)
            .title(&alert.title)
            .text1(&alert.body)
            .scenario(Scenario::Reminder)
            .add_button("Open", &action)
            .on_activated(move |args| {
                let target = args
                    .as_deref()
                    .and_then(parse_activation_argument)
                    .unwrap_or(task_id);
                if let Err(err) = launch_show(target) {
                    tracing::warn!(task_id = target, error = %err, "could not open task");
                }
                Ok(())
            })
            .show()
            .map_err(|err| AppError::io(err.to_string()))?;
        Ok(())
    }
}
