use crate::{
    cancel::{CancelToken, Interrupted},
    network::{Network, Scratch},
    tensor::Tensor,
};

/// Per-pixel classifier: one network evaluation per pixel, 3 inputs to
/// one output per class through a hidden layer of `9 * class_count` units.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelNet {
    network: Network,
}

impl PixelNet {
    pub(crate) const INPUT_CHANNELS: usize = 3;

    #[must_use]
    pub fn new(class_count: usize) -> Self {
        Self {
            network: Network::new(Self::INPUT_CHANNELS, vec![9 * class_count], class_count),
        }
    }

    pub(crate) fn from_network(network: Network) -> Self {
        Self { network }
    }

    #[must_use]
    pub fn network(&self) -> &Network {
        &self.network
    }

    pub(crate) fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub(crate) fn evaluate(
        &self,
        input: &Tensor,
        cancel: &CancelToken,
    ) -> Result<Tensor, Interrupted> {
        let mut output = Tensor::zeros(input.width(), input.height(), self.network.nb_output());
        let mut scratch = Scratch::default();
        for (i, pixel) in input.pixels().enumerate() {
            cancel.check()?;
            self.network
                .eval_into(pixel, &mut scratch, output.pixel_at_mut(i));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology() {
        let net = PixelNet::new(2);
        assert_eq!(net.network().nb_input(), 3);
        assert_eq!(net.network().hidden_layers(), &[18]);
        assert_eq!(net.network().nb_output(), 2);
    }

    #[test]
    fn test_evaluate_uses_same_network_per_pixel() {
        let mut net = PixelNet::new(1);
        let mut params = vec![0.0; net.network().params().len()];
        // first hidden unit copies the red channel, output copies that unit
        params[1] = 1.0;
        let output_row = 9 * 4;
        params[output_row + 1] = 1.0;
        net.network_mut().set_params(&params);

        let mut input = Tensor::zeros(2, 1, 3);
        input.pixel_mut(0, 0)[0] = 1.0;
        let output = net.evaluate(&input, &CancelToken::new()).unwrap();

        assert!(output.pixel(0, 0)[0] > 0.5);
        assert!(output.pixel(1, 0)[0].abs() < 1e-6);
    }
}
