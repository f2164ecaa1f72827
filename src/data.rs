use burn::{
    data::{dataloader::batcher::Batcher, dataset::vision::MnistItem},
    prelude::*,
    tensor::ElementConversion,
};

/// Width and height of an MNIST image.
pub const IMAGE_SIZE: usize = 28;

/// Largest pixel intensity in the raw dataset.
const MAX_PIXEL: f32 = 255.0;

#[derive(Clone, Default)]
pub struct MnistBatcher {}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Images with values in `[0, 1]`, shaped `[batch_size, 28, 28]`.
    pub images: Tensor<B, 3>,
    /// Class indices, shaped `[batch_size]`.
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, MnistItem, MnistBatch<B>> for MnistBatcher {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B> {
        let images = items
            .iter()
            .map(|item| TensorData::from(item.image).convert::<B::FloatElem>())
            .map(|data| Tensor::<B, 2>::from_data(data, device))
            .map(|tensor| tensor.reshape([1, IMAGE_SIZE, IMAGE_SIZE]))
            .map(|tensor| tensor / MAX_PIXEL)
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    [(item.label as i64).elem::<B::IntElem>()],
                    device,
                )
            })
            .collect();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);

        MnistBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    fn item(fill: f32, label: u8) -> MnistItem {
        MnistItem {
            image: [[fill; IMAGE_SIZE]; IMAGE_SIZE],
            label,
        }
    }

    #[test]
    fn batch_scales_pixels_into_unit_interval() {
        let device = Default::default();
        let batch: MnistBatch<TestBackend> = MnistBatcher::default().batch(
            vec![item(0.0, 1), item(255.0, 7), item(51.0, 3)],
            &device,
        );

        assert_eq!(batch.images.dims(), [3, IMAGE_SIZE, IMAGE_SIZE]);

        let max = batch.images.clone().max().into_scalar().elem::<f32>();
        let min = batch.images.clone().min().into_scalar().elem::<f32>();
        assert_eq!(max, 1.0);
        assert_eq!(min, 0.0);

        let third = batch
            .images
            .slice([2..3, 0..1, 0..1])
            .into_scalar()
            .elem::<f32>();
        assert!((third - 0.2).abs() < 1e-6);
    }

    #[test]
    fn batch_keeps_labels_as_class_indices() {
        let device = Default::default();
        let batch: MnistBatch<TestBackend> = MnistBatcher::default()
            .batch(vec![item(0.0, 4), item(0.0, 0), item(0.0, 9)], &device);

        let targets = batch
            .targets
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        assert_eq!(targets, vec![4, 0, 9]);
    }
}
