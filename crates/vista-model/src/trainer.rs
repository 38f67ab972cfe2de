//! Supervised training loop and evaluation.

use std::path::PathBuf;

use burn::module::AutodiffModule;
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use tracing::{debug, info};
use vista_core::{DirectoryIterator, ImageTensor, LabeledBatch};

use crate::backend::{Device, ServeBackend, TrainBackend};
use crate::callbacks::{BestCheckpoint, EarlyStopping, ReduceLrOnPlateau};
use crate::error::{ModelError, Result};
use crate::history::{EpochMetrics, Evaluation, TrainingHistory};
use crate::metadata::ModelMetadata;
use crate::network::Network;
use crate::store::save_network;

/// Where the best-validation-accuracy weights are written during training.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub path: PathBuf,
    pub metadata: ModelMetadata,
}

#[derive(Debug, Clone)]
pub struct TrainSettings {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Leading feature blocks excluded from updates
    pub frozen_blocks: usize,
    pub class_weights: Option<Vec<f32>>,
    pub checkpoint: Option<Checkpoint>,
    pub early_stopping_patience: usize,
    /// Adam decoupled penalty
    pub weight_decay: f32,
}

impl TrainSettings {
    pub fn new(epochs: usize, learning_rate: f64, frozen_blocks: usize) -> Self {
        Self {
            epochs,
            learning_rate,
            frozen_blocks,
            class_weights: None,
            checkpoint: None,
            early_stopping_patience: 10,
            weight_decay: 0.01,
        }
    }
}

pub fn image_tensor<B: Backend>(images: &ImageTensor, device: &B::Device) -> Tensor<B, 4> {
    Tensor::from_data(TensorData::new(images.data().to_vec(), images.shape()), device)
}

fn label_tensor<B: Backend>(labels: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let labels: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
    let len = labels.len();
    Tensor::from_data(TensorData::new(labels, [len]), device)
}

pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| ModelError::Output(format!("{e:?}")))
}

/// Index of the largest value; the lowest index wins a tie.
pub fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in row.iter().enumerate() {
        if *v > row[best] {
            best = i;
        }
    }
    best
}

/// Running loss and accuracy over the batches of one pass.
#[derive(Debug, Default)]
struct Tally {
    samples: usize,
    loss_sum: f64,
    correct: usize,
    true_positives: usize,
    false_positives: usize,
    false_negatives: usize,
}

impl Tally {
    fn add(&mut self, outputs: &[f32], labels: &[usize], batch_loss: f64) {
        let num_classes = outputs.len() / labels.len().max(1);
        self.samples += labels.len();
        self.loss_sum += batch_loss * labels.len() as f64;
        for (row, &label) in outputs.chunks(num_classes).zip(labels) {
            if argmax(row) == label {
                self.correct += 1;
            }
        }
    }

    /// One-hot scoring of probabilities at a 0.5 threshold.
    fn add_thresholded(&mut self, probabilities: &[f32], labels: &[usize]) {
        let num_classes = probabilities.len() / labels.len().max(1);
        for (row, &label) in probabilities.chunks(num_classes).zip(labels) {
            for (class, &p) in row.iter().enumerate() {
                let predicted = p > 0.5;
                let actual = class == label;
                match (predicted, actual) {
                    (true, true) => self.true_positives += 1,
                    (true, false) => self.false_positives += 1,
                    (false, true) => self.false_negatives += 1,
                    (false, false) => {}
                }
            }
        }
    }

    fn loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.loss_sum / self.samples as f64
        }
    }

    fn accuracy(&self) -> f64 {
        ratio(self.correct, self.samples)
    }

    fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn scalar<B: Backend>(loss: Tensor<B, 1>) -> f64 {
    loss.into_scalar().elem::<f64>()
}

fn score<F>(
    model: &Network<ServeBackend>,
    data: &DirectoryIterator,
    loss_fn: &CrossEntropyLoss<ServeBackend>,
    device: &Device,
    mut per_batch: F,
) -> Result<Tally>
where
    F: FnMut(&mut Tally, &LabeledBatch, Tensor<ServeBackend, 2>) -> Result<()>,
{
    let mut tally = Tally::default();
    for batch in data.iter_epoch(0) {
        let images = image_tensor::<ServeBackend>(&batch.images, device);
        let targets = label_tensor::<ServeBackend>(&batch.labels, device);
        let logits = model.forward(images, 0);

        let loss = scalar(loss_fn.forward(logits.clone(), targets));
        tally.add(&to_host(logits.clone())?, &batch.labels, loss);
        per_batch(&mut tally, &batch, logits)?;
    }
    Ok(tally)
}

fn optimizer(settings: &TrainSettings) -> AdamConfig {
    AdamConfig::new().with_weight_decay(Some(WeightDecayConfig::new(settings.weight_decay)))
}

/// Run the training loop.
///
/// Each epoch trains on every batch of `train`, then scores on `val` (or
/// reports the training scores when `val` is empty). Validation loss drives
/// early stopping and learning-rate decay; validation accuracy drives the
/// checkpoint. `on_epoch` sees the metrics of every finished epoch.
pub fn fit(
    model: Network<TrainBackend>,
    train: &DirectoryIterator,
    val: &DirectoryIterator,
    settings: &TrainSettings,
    device: &Device,
    on_epoch: &mut dyn FnMut(&EpochMetrics),
) -> Result<(Network<TrainBackend>, TrainingHistory)> {
    if train.is_empty() {
        return Err(ModelError::Training("no training images".into()));
    }

    let loss_config = CrossEntropyLossConfig::new().with_weights(settings.class_weights.clone());
    let train_loss = loss_config.init::<TrainBackend>(device);
    let val_loss_fn = CrossEntropyLossConfig::new().init::<ServeBackend>(device);

    let mut optim = optimizer(settings).init::<TrainBackend, Network<TrainBackend>>();

    let mut model = model;
    let mut lr = settings.learning_rate;
    let mut stopper = EarlyStopping::new(settings.early_stopping_patience);
    let mut plateau = ReduceLrOnPlateau::default();
    let mut best = BestCheckpoint::default();
    let mut history = TrainingHistory::default();

    info!(
        epochs = settings.epochs,
        lr,
        frozen_blocks = settings.frozen_blocks,
        train = train.len(),
        validation = val.len(),
        "Starting training"
    );

    for epoch in 0..settings.epochs {
        let mut tally = Tally::default();

        for batch in train.iter_epoch(epoch) {
            let images = image_tensor::<TrainBackend>(&batch.images, device);
            let targets = label_tensor::<TrainBackend>(&batch.labels, device);

            let logits = model.forward(images, settings.frozen_blocks);
            let outputs = to_host(logits.clone())?;
            let loss = train_loss.forward(logits, targets);
            tally.add(&outputs, &batch.labels, scalar(loss.clone()));

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);
        }

        let (val_loss, val_accuracy) = if val.is_empty() {
            (tally.loss(), tally.accuracy())
        } else {
            let scored = score(&model.valid(), val, &val_loss_fn, device, |_, _, _| Ok(()))?;
            (scored.loss(), scored.accuracy())
        };

        let metrics = EpochMetrics {
            epoch,
            total_epochs: settings.epochs,
            loss: tally.loss(),
            accuracy: tally.accuracy(),
            val_loss,
            val_accuracy,
            learning_rate: lr,
        };
        info!(
            epoch = epoch + 1,
            of = settings.epochs,
            loss = metrics.loss,
            accuracy = metrics.accuracy,
            val_loss,
            val_accuracy,
            "Epoch finished"
        );
        history.epochs.push(metrics);
        on_epoch(&metrics);

        if best.improved(val_accuracy) {
            if let Some(checkpoint) = &settings.checkpoint {
                save_network(&model.valid(), &checkpoint.path, &checkpoint.metadata)?;
                debug!(val_accuracy, path = %checkpoint.path.display(), "Checkpointed best model");
            }
        }

        lr = plateau.update(val_loss, lr);
        if stopper.update(epoch, val_loss, &model) {
            history.stopped_early = true;
            break;
        }
    }

    history.best_epoch = stopper.best_epoch();
    if history.stopped_early {
        if let Some(best_model) = stopper.into_best() {
            model = best_model;
        }
    }

    Ok((model, history))
}

/// Loss, accuracy, precision, recall and F1 over a labeled dataset.
pub fn evaluate(
    model: &Network<ServeBackend>,
    data: &DirectoryIterator,
    device: &Device,
) -> Result<Evaluation> {
    if data.is_empty() {
        return Err(ModelError::Training("no evaluation images".into()));
    }

    let loss_fn = CrossEntropyLossConfig::new().init::<ServeBackend>(device);
    let tally = score(model, data, &loss_fn, device, |tally, batch, logits| {
        let probabilities = to_host(softmax(logits, 1))?;
        tally.add_thresholded(&probabilities, &batch.labels);
        Ok(())
    })?;

    let evaluation = Evaluation::new(
        tally.loss(),
        tally.accuracy(),
        tally.precision(),
        tally.recall(),
    );
    info!(
        loss = evaluation.loss,
        accuracy = evaluation.accuracy,
        precision = evaluation.precision,
        recall = evaluation.recall,
        f1_score = evaluation.f1_score,
        "Evaluation finished"
    );
    Ok(evaluation)
}
