use crate::{
    callback::{CarbonCallback, EpochLogs, TrainingCallback},
    data::MnistBatcher,
    model::{Model, ModelConfig},
    tracker::{EmissionsTrackerConfig, Tracker, TrackerError},
    Error,
};
use burn::{
    data::{
        dataloader::DataLoaderBuilder,
        dataset::{
            vision::{MnistDataset, MnistItem},
            Dataset,
        },
    },
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
    train::ClassificationOutput,
};

pub const ARTIFACT_DIR: &str = "/tmp/mnist-carbon";

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: AdamConfig,
    pub tracker: EmissionsTrackerConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
}

/// Per-epoch metrics recorded by [fit].
#[derive(Debug, Clone, Default)]
pub struct History {
    epochs: Vec<EpochLogs>,
}

impl History {
    pub fn epochs(&self) -> &[EpochLogs] {
        &self.epochs
    }

    pub fn last(&self) -> Option<&EpochLogs> {
        self.epochs.last()
    }

    /// Values of one metric, in epoch order.
    pub fn metric(&self, name: &str) -> Vec<f64> {
        self.epochs.iter().filter_map(|logs| logs.get(name)).collect()
    }
}

/// Running loss and accuracy over the batches of an epoch.
#[derive(Debug, Default)]
struct EpochMetrics {
    loss_sum: f64,
    num_correct: usize,
    num_items: usize,
}

impl EpochMetrics {
    fn update<B: Backend>(&mut self, output: &ClassificationOutput<B>) {
        let [batch_size] = output.targets.dims();

        let loss = output.loss.clone().into_scalar().elem::<f64>();
        let predictions = output.output.clone().argmax(1).reshape([batch_size]);
        let num_correct = predictions
            .equal(output.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.loss_sum += loss * batch_size as f64;
        self.num_correct += num_correct as usize;
        self.num_items += batch_size;
    }

    fn logs(&self) -> EpochLogs {
        let mut logs = EpochLogs::new();
        if self.num_items == 0 {
            return logs;
        }

        let num_items = self.num_items as f64;
        logs.insert("loss", self.loss_sum / num_items);
        logs.insert("accuracy", 100.0 * self.num_correct as f64 / num_items);
        logs
    }
}

/// Trains the model for `config.num_epochs` epochs.
///
/// Every callback is notified synchronously, in registration order, at the
/// beginning and end of training and of every epoch.
pub fn fit<B, D>(
    config: &TrainingConfig,
    mut model: Model<B>,
    dataset: D,
    device: &B::Device,
    callbacks: &mut [&mut dyn TrainingCallback],
) -> (Model<B>, History)
where
    B: AutodiffBackend,
    D: Dataset<MnistItem> + 'static,
{
    log::info!("Fitting {} items for {} epochs", dataset.len(), config.num_epochs);

    let mut optim = config.optimizer.init();
    let dataloader = DataLoaderBuilder::<B, _, _>::new(MnistBatcher::default())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .set_device(device.clone())
        .build(dataset);

    for callback in callbacks.iter_mut() {
        callback.on_train_begin();
    }

    let mut history = History::default();

    for epoch in 0..config.num_epochs {
        for callback in callbacks.iter_mut() {
            callback.on_epoch_begin(epoch);
        }

        let mut metrics = EpochMetrics::default();

        for batch in dataloader.iter() {
            let output = model.forward_classification(batch.images, batch.targets);
            metrics.update(&output);

            // Gradients for the current backward pass
            let grads = output.loss.backward();
            // Gradients linked to each parameter of the model.
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        let logs = metrics.logs();
        log::info!("[Train - Epoch {}/{}] {}", epoch + 1, config.num_epochs, logs);

        for callback in callbacks.iter_mut() {
            callback.on_epoch_end(epoch, Some(&logs));
        }

        history.epochs.push(logs);
    }

    for callback in callbacks.iter_mut() {
        callback.on_train_end(history.last());
    }

    (model, history)
}

/// Trains the model inside an emissions tracking window.
///
/// The tracker is started right before the first epoch, flushed by a
/// [CarbonCallback] after every epoch and stopped once training returns.
/// Anything the caller does before, like loading the dataset, is not tracked.
pub fn fit_tracked<B, D, T>(
    config: &TrainingConfig,
    model: Model<B>,
    dataset: D,
    device: &B::Device,
    mut tracker: T,
) -> Result<(Model<B>, History, f64), TrackerError>
where
    B: AutodiffBackend,
    D: Dataset<MnistItem> + 'static,
    T: Tracker,
{
    tracker.start()?;

    let mut carbon = CarbonCallback::new(&mut tracker);
    let (model, history) = fit(config, model, dataset, device, &mut [&mut carbon]);

    let emissions = tracker.stop()?;

    Ok((model, history, emissions))
}

/// Computes the loss and accuracy of the model on a dataset, without updating it.
pub fn evaluate<B, D>(
    model: &Model<B>,
    dataset: D,
    batch_size: usize,
    device: &B::Device,
) -> EpochLogs
where
    B: Backend,
    D: Dataset<MnistItem> + 'static,
{
    let dataloader = DataLoaderBuilder::<B, _, _>::new(MnistBatcher::default())
        .batch_size(batch_size)
        .set_device(device.clone())
        .build(dataset);

    let mut metrics = EpochMetrics::default();
    for batch in dataloader.iter() {
        let output = model.forward_classification(batch.images, batch.targets);
        metrics.update(&output);
    }

    metrics.logs()
}

/// Trains on MNIST while tracking emissions and returns the emissions in kg CO2-eq.
pub fn run<B: AutodiffBackend>(device: B::Device) -> Result<f64, Error> {
    std::fs::create_dir_all(ARTIFACT_DIR)?;

    let config = TrainingConfig::new(
        ModelConfig::new(),
        AdamConfig::new(),
        EmissionsTrackerConfig::new(),
    );
    config.save(format!("{ARTIFACT_DIR}/config.json"))?;

    B::seed(config.seed);

    let dataset_train = MnistDataset::train();
    let dataset_test = MnistDataset::test();
    let model = config.model.init::<B>(&device);

    let tracker = config.tracker.init();
    let (model, history, emissions) = fit_tracked(&config, model, dataset_train, &device, tracker)?;
    log::info!("Training accuracy per epoch: {:?}", history.metric("accuracy"));

    let logs = evaluate(&model.valid(), dataset_test, config.batch_size, &device);
    log::info!("[Test] {logs}");

    Ok(emissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    #[test]
    fn default_config_matches_reference_training() {
        let config = TrainingConfig::new(
            ModelConfig::new(),
            AdamConfig::new(),
            EmissionsTrackerConfig::new(),
        );

        assert_eq!(config.num_epochs, 10);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.learning_rate, 1e-3);
    }

    #[test]
    fn metrics_are_weighted_by_batch_size() {
        let device = Default::default();
        let mut metrics = EpochMetrics::default();

        metrics.update(&ClassificationOutput::<TestBackend>::new(
            Tensor::from_floats([1.0], &device),
            Tensor::from_floats([[0.9, 0.1], [0.2, 0.8], [0.7, 0.3]], &device),
            Tensor::from_data([0, 1, 1], &device),
        ));
        metrics.update(&ClassificationOutput::<TestBackend>::new(
            Tensor::from_floats([3.0], &device),
            Tensor::from_floats([[0.1, 0.9]], &device),
            Tensor::from_data([1], &device),
        ));

        let logs = metrics.logs();
        assert_eq!(logs.get("loss"), Some(1.5));
        assert_eq!(logs.get("accuracy"), Some(75.0));
    }

    #[test]
    fn no_batches_means_empty_logs() {
        assert!(EpochMetrics::default().logs().is_empty());
    }
}
