//! # 统计工具
//!
//! 容差测量使用的样本统计。

/// 算术平均值（空样本返回 0）
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// 样本标准差（分母 n - 1）
///
/// 少于两个样本时返回 0。
pub fn sample_std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }

    let mean = mean(samples);
    let sum_sq: f64 = samples.iter().map(|x| (x - mean).powi(2)).sum();
    (sum_sq / (samples.len() - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sample_std_dev() {
        assert_eq!(sample_std_dev(&[]), 0.0);
        assert_eq!(sample_std_dev(&[5.0]), 0.0);
        assert_eq!(sample_std_dev(&[3.0; 10]), 0.0);

        // 均值 5，平方和 32，n - 1 = 7
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((sample_std_dev(&samples) - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 2.0, 6.0]), 3.0);
    }

    proptest! {
        /// 平移不改变标准差
        #[test]
        fn test_std_dev_shift_invariant(
            samples in prop::collection::vec(-1000i32..1000, 2..20),
            shift in -100_000i32..100_000,
        ) {
            let base: Vec<f64> = samples.iter().map(|&x| f64::from(x)).collect();
            let shifted: Vec<f64> = samples.iter().map(|&x| f64::from(x + shift)).collect();
            prop_assert!((sample_std_dev(&base) - sample_std_dev(&shifted)).abs() < 1e-6);
        }
    }
}
