use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::{RunStatus, TrainingController};
use crate::LabError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    StartTraining,
    TogglePause,
    Stop,
    Predict,
    SaveModel,
    LoadModel,
    LoadPretrained,
    NewModel,
    RestoreSnapshot,
    SelectDataSource,
}

impl Command {
    pub const ALL: [Command; 10] = [
        Command::StartTraining,
        Command::TogglePause,
        Command::Stop,
        Command::Predict,
        Command::SaveModel,
        Command::LoadModel,
        Command::LoadPretrained,
        Command::NewModel,
        Command::RestoreSnapshot,
        Command::SelectDataSource,
    ];
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::StartTraining => "start training",
            Command::TogglePause => "pause / resume",
            Command::Stop => "stop",
            Command::Predict => "predict",
            Command::SaveModel => "save model",
            Command::LoadModel => "load model",
            Command::LoadPretrained => "load pretrained",
            Command::NewModel => "new model",
            Command::RestoreSnapshot => "restore snapshot",
            Command::SelectDataSource => "select data source",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandState {
    pub command: Command,
    pub available: bool,
    /// Why the command is unavailable.
    pub reason: Option<String>,
}

impl TrainingController {
    /// The error `command` would currently fail with, if any.
    pub fn check(&self, command: Command) -> Result<(), LabError> {
        let status = self.status();
        let not_running = || {
            LabError::NotReady("no training run is in progress".to_owned())
        };
        match command {
            Command::StartTraining => {
                self.ensure_idle()?;
                self.active_model()?;
                if self.dataset().is_none() {
                    return Err(LabError::NotReady("no dataset is loaded".to_owned()));
                }
                Ok(())
            }
            Command::TogglePause | Command::Stop => match status {
                RunStatus::Running | RunStatus::Paused => Ok(()),
                RunStatus::Idle | RunStatus::Stopping | RunStatus::Completed => Err(not_running()),
            },
            Command::Predict => self.active_model().map(|_| ()),
            Command::SaveModel => {
                self.ensure_idle()?;
                self.active_model().map(|_| ())
            }
            Command::RestoreSnapshot => {
                self.ensure_idle()?;
                match self.snapshot_name() {
                    Some(_) => Ok(()),
                    None => Err(LabError::NotReady("no snapshot has been saved".to_owned())),
                }
            }
            Command::LoadModel | Command::LoadPretrained | Command::NewModel => self.ensure_idle(),
            Command::SelectDataSource => Ok(()),
        }
    }

    /// Availability of every command, with the reason when unavailable.
    pub fn controls(&self) -> Vec<CommandState> {
        Command::ALL
            .iter()
            .map(|command| match self.check(*command) {
                Ok(()) => CommandState {
                    command: *command,
                    available: true,
                    reason: None,
                },
                Err(e) => CommandState {
                    command: *command,
                    available: false,
                    reason: Some(e.to_string()),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use numbers::Device;

    use super::super::test::{controller, tiny_architecture};
    use super::Command;

    fn available(controller: &crate::TrainingController, command: Command) -> bool {
        controller
            .controls()
            .into_iter()
            .find(|c| c.command == command)
            .map(|c| c.available)
            .unwrap_or(false)
    }

    #[test]
    fn test_controls_follow_state() {
        let ctx = Device::cpu();
        let controller = controller(&ctx);
        let states = controller.controls();
        assert_eq!(states.len(), Command::ALL.len());
        assert!(states
            .iter()
            .all(|s| s.available == s.reason.is_none()));

        assert!(!available(&controller, Command::Predict));
        assert!(!available(&controller, Command::StartTraining));
        assert!(!available(&controller, Command::Stop));
        assert!(available(&controller, Command::NewModel));

        controller.new_model_from(tiny_architecture()).unwrap();
        assert!(available(&controller, Command::Predict));
        assert!(!available(&controller, Command::StartTraining));

        controller
            .select_data_source(crate::dataset::DataVariant::Sample, &mut |_| {})
            .unwrap();
        assert!(available(&controller, Command::StartTraining));
        assert!(!available(&controller, Command::RestoreSnapshot));
    }
}
