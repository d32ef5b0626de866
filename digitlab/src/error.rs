use neuralnetworks::NetworkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabError {
    #[error("not ready: {0}")]
    NotReady(String),
    #[error("a training run is active, wait for it to finish or stop it first")]
    Busy,
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("the model has no convolutional layer to explain")]
    NoConvolutionalLayer,
    #[error("corrupt model: {0}")]
    CorruptModel(String),
    #[error("I/O failure: {0}")]
    IOFailure(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LabError {
    pub(crate) fn io(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        LabError::IOFailure(format!("{}: {}", path.display(), err))
    }
}

impl From<NetworkError> for LabError {
    fn from(value: NetworkError) -> Self {
        match value {
            NetworkError::Disposed | NetworkError::Poisoned => {
                LabError::ResourceUnavailable(value.to_string())
            }
            NetworkError::CorruptWeights(_) | NetworkError::Encoding(_) => {
                LabError::CorruptModel(value.to_string())
            }
            NetworkError::NotCompiled => LabError::NotReady(value.to_string()),
            NetworkError::Shape(_)
            | NetworkError::InputShape { .. }
            | NetworkError::LayerIndex { .. }
            | NetworkError::InvalidLayer { .. } => LabError::InvalidConfig(value.to_string()),
        }
    }
}

impl From<numbers::ShapeError> for LabError {
    fn from(value: numbers::ShapeError) -> Self {
        LabError::InvalidConfig(value.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for LabError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        LabError::ResourceUnavailable("state is unavailable after a panic in another thread".to_owned())
    }
}

#[cfg(test)]
mod test {
    use neuralnetworks::NetworkError;

    use super::LabError;

    #[test]
    fn test_network_errors_map_to_kinds() {
        assert!(matches!(
            LabError::from(NetworkError::Disposed),
            LabError::ResourceUnavailable(_)
        ));
        assert!(matches!(
            LabError::from(NetworkError::CorruptWeights("x".to_owned())),
            LabError::CorruptModel(_)
        ));
        assert!(matches!(
            LabError::from(NetworkError::LayerIndex { index: 3, layers: 2 }),
            LabError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_messages_are_distinguishable() {
        let messages = [
            LabError::NotReady("no dataset is loaded".to_owned()).to_string(),
            LabError::Busy.to_string(),
            LabError::ResourceUnavailable("gone".to_owned()).to_string(),
            LabError::NoConvolutionalLayer.to_string(),
            LabError::CorruptModel("bad".to_owned()).to_string(),
            LabError::IOFailure("missing".to_owned()).to_string(),
            LabError::InvalidConfig("zero".to_owned()).to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
