//! Offline subcommands of the `vista` binary.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use vista_core::synthetic::samples_for_label;
use vista_core::{build_test_iterator, build_train_iterators, dataset_statistics};
use vista_model::{EpochMetrics, ImageClassifier};

use crate::config::AppConfig;
use crate::prediction::{ImageSource, PredictionLog, PredictionService, Record};
use crate::retrain::{ClassifierRetrain, RetrainOutcome, Retrainer};
use crate::serving::ServiceHandle;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    /// 0 skips fine-tuning
    pub fine_tune_epochs: usize,
    pub unfreeze_from: usize,
    pub balance_classes: bool,
}

fn log_epoch(metrics: &EpochMetrics) {
    info!(
        epoch = metrics.epoch + 1,
        total = metrics.total_epochs,
        loss = metrics.loss,
        accuracy = metrics.accuracy,
        val_loss = metrics.val_loss,
        val_accuracy = metrics.val_accuracy,
        lr = metrics.learning_rate,
        "Epoch finished"
    );
}

/// Train a model from scratch on the training directory and write the serving artifacts.
pub fn train(config: &AppConfig, options: &TrainOptions) -> anyhow::Result<()> {
    let (train, val) = build_train_iterators(
        &config.train_dir,
        config.image_size(),
        config.batch_size,
        config.validation_split,
        config.seed,
    )?;

    let mut classifier =
        ImageClassifier::new(config.image_size(), train.num_classes(), config.learning_rate)
            .with_backbone_weights(config.backbone_weights.clone())
            .with_checkpoint_dir(Some(config.model_dir.clone()));
    if options.balance_classes {
        let weights = train.class_weights();
        info!(?weights, "Balancing classes");
        classifier.set_class_weights(Some(weights));
    }
    classifier.create()?;
    info!("\n{}", classifier.summary()?);

    let history = classifier.train(&train, &val, options.epochs, &mut log_epoch)?;
    info!(
        epochs = history.len(),
        best_val_accuracy = ?history.best_val_accuracy(),
        "Training finished"
    );

    if options.fine_tune_epochs > 0 {
        classifier.fine_tune(
            &train,
            &val,
            options.fine_tune_epochs,
            options.unfreeze_from,
            &mut log_epoch,
        )?;
    }

    if config.test_dir.exists() {
        match build_test_iterator(&config.test_dir, config.image_size(), config.batch_size) {
            Ok(test) if test.class_index() == train.class_index() => {
                let evaluation = classifier.evaluate(&test)?;
                println!("{}", serde_json::to_string_pretty(&evaluation)?);
            }
            Ok(_) => warn!("Test classes differ from training classes; skipping evaluation"),
            Err(e) => warn!("Skipping evaluation: {e}"),
        }
    }

    let saved = classifier.save(&config.model_path)?;
    train
        .class_index()
        .save(&config.class_indices_path)
        .context("writing class index")?;
    info!(model = %saved.display(), classes = ?train.class_index().names(), "Model saved");
    Ok(())
}

/// Run one retraining job in the foreground.
pub async fn retrain(config: &AppConfig) -> anyhow::Result<()> {
    let services = Arc::new(ServiceHandle::new(
        &config.model_path,
        &config.class_indices_path,
    ));
    let retrainer = Retrainer::new(ClassifierRetrain::new(
        config.retrain_settings(),
        Arc::clone(&services),
    ));

    match retrainer.start()?.wait().await {
        RetrainOutcome::Succeeded {
            model_path,
            elapsed,
        } => {
            info!(archived = %model_path.display(), ?elapsed, "Retrained");
            Ok(())
        }
        RetrainOutcome::Failed { message } => bail!(message),
    }
}

fn entry<T: Serialize>(record: &Record<T>) -> serde_json::Result<(bool, Value)> {
    Ok((record.is_success(), serde_json::to_value(record)?))
}

#[derive(Debug, Clone, Default)]
pub struct PredictOptions {
    pub top_k: Option<usize>,
    pub threshold: Option<f32>,
}

/// Prints one JSON record per image; fails if any prediction failed.
pub fn predict(
    config: &AppConfig,
    images: &[PathBuf],
    options: &PredictOptions,
) -> anyhow::Result<()> {
    let service = PredictionService::new(&config.model_path, &config.class_indices_path)?;

    let records = match (options.top_k, options.threshold) {
        (Some(k), _) => images
            .iter()
            .map(|p| entry(&service.top_k(&ImageSource::Path(p.clone()), k)))
            .collect::<serde_json::Result<Vec<_>>>()?,
        (None, Some(threshold)) => images
            .iter()
            .map(|p| entry(&service.with_threshold(&ImageSource::Path(p.clone()), threshold)))
            .collect::<serde_json::Result<Vec<_>>>()?,
        (None, None) => service
            .predict_batch(images)
            .iter()
            .map(entry)
            .collect::<serde_json::Result<Vec<_>>>()?,
    };

    let failed = records.iter().filter(|(ok, _)| !ok).count();
    let values: Vec<Value> = records.into_iter().map(|(_, v)| v).collect();
    let output = match values.as_slice() {
        [single] => serde_json::to_string_pretty(single)?,
        _ => serde_json::to_string_pretty(&values)?,
    };
    println!("{output}");

    if failed > 0 {
        bail!("{failed} of {} predictions failed", images.len());
    }
    Ok(())
}

pub fn stats(config: &AppConfig) -> anyhow::Result<()> {
    let report = json!({
        "dataset": dataset_statistics(&config.train_dir)?,
        "predictions": PredictionLog::new(&config.prediction_log).statistics()?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Create the working directories, optionally with synthetic images per class.
pub fn scaffold(config: &AppConfig, classes: &[String], samples: usize) -> anyhow::Result<()> {
    let mut dirs = vec![
        config.model_dir.clone(),
        config.upload_dir.clone(),
        config.train_dir.clone(),
        config.test_dir.clone(),
    ];
    if let Some(parent) = config.prediction_log.parent() {
        dirs.push(parent.to_path_buf());
    }
    for class in classes {
        dirs.push(config.train_dir.join(class));
        dirs.push(config.test_dir.join(class));
    }
    for dir in dirs.iter().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    if samples > 0 {
        let test_samples = (samples / 4).max(1);
        for class in classes {
            for (dir, count) in [
                (config.train_dir.join(class), samples),
                (config.test_dir.join(class), test_samples),
            ] {
                for (i, img) in samples_for_label(class, count, config.img_size)
                    .iter()
                    .enumerate()
                {
                    img.save(dir.join(format!("{class}_{i:03}.png")))?;
                }
            }
            info!(class = %class, train = samples, test = test_samples, "Wrote synthetic samples");
        }
    }
    info!(train_dir = %config.train_dir.display(), "Scaffold ready");
    Ok(())
}
