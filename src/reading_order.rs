/// Returns a random permutation of `0..length` using a Fisher–Yates shuffle.
///
/// `random` must yield values in `[0, 1)`. Out-of-range draws are clamped so
/// the result is always a permutation.
pub fn create_reading_order<R>(length: usize, mut random: R) -> Vec<usize>
where
    R: FnMut() -> f64,
{
    let mut order: Vec<usize> = (0..length).collect();

    for i in (1..length).rev() {
        let j = ((random() * (i + 1) as f64).floor() as usize).min(i);
        order.swap(i, j);
    }

    order
}

/// Uniform `[0, 1)` draw from the thread-local generator; the default
/// source for sessions.
pub fn uniform_random() -> f64 {
    rand::random::<f64>()
}
