// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// One step of the pseudo-random walk `y -> y^2 + c (mod n)`.
///
/// `y` and `c` are below `n < 2^64`, so the square fits in 128 bits.
fn step(y: u128, c: u128, n: u128) -> u128 {
    (y * y % n + c) % n
}

/// Split `pq`, the product of two primes sent by the server during the
/// key exchange, into its two factors `(p, q)` with `p <= q`.
///
/// This uses Richard Brent's variant of [Pollard's rho algorithm], which
/// batches the `gcd` computations and only backtracks when the batch
/// overshoots.
///
/// [Pollard's rho algorithm]: https://en.wikipedia.org/wiki/Pollard%27s_rho_algorithm
#[allow(clippy::many_single_char_names)]
pub fn factorize(pq: u64) -> (u64, u64) {
    if pq % 2 == 0 {
        return (2, pq / 2);
    }

    let n = pq as u128;
    let diff = |a: u128, b: u128| a.abs_diff(b);

    // Any values in 1..n work; these are fixed so the result is reproducible.
    let c = n / 2;
    let batch = 3 * n / 4;
    let mut y = n / 4;

    let mut factor = 1u128;
    let mut run = 1u128;
    let mut product = 1u128;
    let mut x = y;
    let mut saved = y;

    while factor == 1 {
        x = y;
        for _ in 0..run {
            y = step(y, c, n);
        }

        let mut done = 0;
        while done < run && factor == 1 {
            saved = y;
            for _ in 0..batch.min(run - done) {
                y = step(y, c, n);
                product = product * diff(x, y) % n;
            }
            factor = gcd(product, n);
            done += batch;
        }
        run *= 2;
    }

    if factor == n {
        // The batch overshot; redo it one step at a time.
        loop {
            saved = step(saved, c, n);
            factor = gcd(diff(x, saved), n);
            if factor > 1 {
                break;
            }
        }
    }

    let (p, q) = (factor as u64, (n / factor) as u64);
    (p.min(q), p.max(q))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factorizes_server_products() {
        assert_eq!(factorize(1470626929934143021), (1206429347, 1218991343));
        assert_eq!(factorize(2363612107535801713), (1518968219, 1556064227));
    }

    #[test]
    fn even_products_short_circuit() {
        assert_eq!(factorize(2 * 1000003), (2, 1000003));
    }

    #[test]
    fn factors_multiply_back() {
        let pq = 17 * 19;
        let (p, q) = factorize(pq);
        assert_eq!(p * q, pq);
        assert!(p <= q);
    }
}
